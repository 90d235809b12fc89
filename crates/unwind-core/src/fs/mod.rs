/// File system access and module organization
pub mod common;
pub mod ntfs;
