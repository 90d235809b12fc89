/// Raw device access shared by the NTFS reader and the recovery backends
mod types;

pub use types::*;
