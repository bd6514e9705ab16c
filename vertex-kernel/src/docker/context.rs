//! Build context packaging

use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Directories never sent to the Docker daemon
const EXCLUDED: &[&str] = &[".git", ".hg", ".svn"];

/// Packs `dir` into an in-memory tar archive, skipping VCS metadata
pub fn archive(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            !EXCLUDED
                .iter()
                .any(|excluded| entry.file_name() == *excluded)
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(io::Error::other)?;

        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), relative)?;
        }
    }

    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entries(archive: &[u8]) -> Vec<String> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_archive_excludes_git() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.sh"), "echo hi\n").unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let archive = archive(dir.path()).unwrap();
        let names = entries(&archive);

        assert!(names.iter().any(|n| n == "Dockerfile"));
        assert!(names.iter().any(|n| n.trim_end_matches('/') == "src"));
        assert!(names.iter().any(|n| n == "src/main.sh"));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
    }
}
