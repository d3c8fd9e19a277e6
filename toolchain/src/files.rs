// files.rs — File discovery and all-or-nothing writes
//
// Shared by the registry (header discovery) and the rewriter (source
// discovery, in-place apply).
//
// Preconditions: none.
// Postconditions: `discover` returns paths sorted by file name within each
//                 directory; `write_atomic` either replaces the target with
//                 the full contents or leaves it untouched.
// Failure modes: I/O and directory traversal errors, reported with the path.
// Side effects: filesystem reads; `write_atomic` creates and renames a
//               temporary sibling file.

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

#[derive(Debug)]
pub enum FileError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            FileError::Walk { path, source } => write!(f, "{}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::Io { source, .. } => Some(source),
            FileError::Walk { source, .. } => Some(source),
        }
    }
}

/// Files under `root` whose extension is one of `extensions`.
///
/// A `root` that is itself a file is returned as-is, whatever its extension.
/// Without `recursive`, only the immediate children of `root` are visited.
pub fn discover(
    root: &Path,
    extensions: &[&str],
    recursive: bool,
) -> Result<Vec<PathBuf>, FileError> {
    let meta = std::fs::metadata(root).map_err(|e| FileError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;
    if meta.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| FileError::Walk {
            path: e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if matches {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

pub fn read_to_string(path: &Path) -> Result<String, FileError> {
    std::fs::read_to_string(path).map_err(|e| FileError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Replace `path` with `contents` via a temporary sibling and a rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), FileError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.atlkit.tmp", file_name));

    let io_err = |source: std::io::Error| FileError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::write(&tmp, contents).map_err(io_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}
