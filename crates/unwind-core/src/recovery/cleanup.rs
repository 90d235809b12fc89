//! Removal of side files that NTFS tooling leaves in the output tree

use std::path::Path;
use walkdir::WalkDir;

/// Whether a file name is a known recovery artifact:
/// `*:Zone.Identifier` streams, `.fuse_hidden*` files, `*.ntfs-3g-*` temporaries
/// and dot-files ending in a numeric suffix.
pub fn is_artifact_name(name: &str) -> bool {
    name.ends_with(":Zone.Identifier")
        || name.starts_with(".fuse_hidden")
        || name.contains(".ntfs-3g-")
        || is_numbered_dotfile(name)
}

/// `.<anything>.<digits>`
fn is_numbered_dotfile(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('.') else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((_, suffix)) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Delete artifact files below `output`.
///
/// Returns `false` if the tree could not be walked completely or any artifact
/// could not be removed. Never fails the recovery run.
pub fn cleanup_artifacts(output: &Path) -> bool {
    let mut ok = true;
    let mut removed = 0usize;

    for item in WalkDir::new(output).follow_links(false) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Cleanup walk error: {}", e);
                ok = false;
                continue;
            }
        };

        if item.file_type().is_dir() {
            continue;
        }

        let name = item.file_name().to_string_lossy();
        if !is_artifact_name(&name) {
            continue;
        }

        match std::fs::remove_file(item.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!("Failed to remove {}: {}", item.path().display(), e);
                ok = false;
            }
        }
    }

    tracing::info!("Cleanup removed {} artifact files from {}", removed, output.display());
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert!(is_artifact_name("report.docx:Zone.Identifier"));
        assert!(is_artifact_name(".fuse_hidden0000001a00000001"));
        assert!(is_artifact_name("movie.mkv.ntfs-3g-12"));
        assert!(is_artifact_name(".report.docx.3"));

        assert!(!is_artifact_name("report.docx"));
        assert!(!is_artifact_name(".bashrc"));
        assert!(!is_artifact_name("archive.001"));
    }

    #[test]
    fn test_cleanup_removes_only_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("Docs");
        std::fs::create_dir_all(&docs).unwrap();

        let keep = docs.join("a.txt");
        let zone = docs.join("a.txt:Zone.Identifier");
        let hidden = dir.path().join(".fuse_hidden000a");
        let numbered = docs.join(".a.txt.1");
        for path in [&keep, &zone, &hidden, &numbered] {
            std::fs::write(path, b"x").unwrap();
        }

        assert!(cleanup_artifacts(dir.path()));
        assert!(keep.exists());
        assert!(!zone.exists());
        assert!(!hidden.exists());
        assert!(!numbered.exists());
        assert!(docs.is_dir());
    }

    #[test]
    fn test_cleanup_missing_output_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!cleanup_artifacts(&dir.path().join("missing")));
    }
}
