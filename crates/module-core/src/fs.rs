use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Recursively collect every regular file under `root`, returned as paths
/// relative to `root` using `/`-separated entry names.
///
/// Missing directories are treated as empty. Traversal order is not
/// guaranteed; callers that need a deterministic entry set should sort the
/// result.
pub fn collect_entries(root: &Path) -> io::Result<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false).into_iter() {
        let entry = entry.map_err(|err| err.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walked path is under root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(relative);
    }

    Ok(entries)
}

/// The most recent modification time among `paths`, skipping any that no
/// longer exist.
pub fn max_modified_time(
    paths: impl IntoIterator<Item = PathBuf>,
) -> io::Result<Option<SystemTime>> {
    let mut max_time = None;

    for path in paths {
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let modified = metadata.modified()?;
        max_time = Some(match max_time {
            Some(existing) if existing >= modified => existing,
            _ => modified,
        });
    }

    Ok(max_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_entries_on_missing_dir_is_empty() {
        let entries = collect_entries(Path::new("/nonexistent/definitely")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn collect_entries_walks_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/b.txt"), b"b").unwrap();

        let mut entries = collect_entries(dir.path()).unwrap();
        entries.sort();
        assert_eq!(entries, vec!["a.txt".to_string(), "nested/b.txt".to_string()]);
    }
}
