//! # Tomoalign Formats
//!
//! On-disk models for the three tilt-series alignment conventions handled by
//! tomoalign. Each module mirrors one native format field for field and knows
//! how to parse and render it; none of them converts between formats.
//!
//! Supported formats:
//! - [`imod`]: `.xf`, `.tlt`, `.xtilt`, `tilt.com` and `newst.com`
//! - [`aretomo`]: AreTomo3 `.aln`
//! - [`portal`]: cryoET Data Portal alignment JSON
//! - [`mrc`]: MRC header reader for frame dimensions and pixel spacing

pub mod aretomo;
pub mod imod;
pub mod mrc;
pub mod portal;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Upper bound on the number of sections in one tilt series.
///
/// Section counts read from files are checked against it before anything
/// is sized by them.
pub const MAX_SECTIONS: usize = 10_000;

/// Errors during alignment file parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Parse one whitespace-separated numeric token.
pub(crate) fn parse_f64(token: &str, line: usize, what: &str) -> Result<f64, ParseError> {
    token.parse().map_err(|_| ParseError::FormatError {
        line,
        message: format!("Invalid {}: {}", what, token),
    })
}

/// Split `line` into exactly `n` numeric fields.
pub(crate) fn parse_fields(line: &str, line_no: usize, n: usize) -> Result<Vec<f64>, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < n {
        return Err(ParseError::FormatError {
            line: line_no,
            message: format!("Expected {} fields, got {}: '{}'", n, parts.len(), line.trim()),
        });
    }
    parts[..n]
        .iter()
        .enumerate()
        .map(|(i, p)| parse_f64(p, line_no, &format!("field {}", i + 1)))
        .collect()
}

/// Write every `(path, content)` pair, creating parent directories.
///
/// Each file is first written next to its target as `<name>.partial` and
/// only renamed into place once every file has been written. A failure while
/// writing removes the partial files and leaves all targets untouched. A
/// failure during the renames themselves can still leave earlier targets
/// replaced.
pub fn write_files(files: &[(PathBuf, String)]) -> std::io::Result<Vec<PathBuf>> {
    for (path, _) in files {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut staged = Vec::with_capacity(files.len());
    for (path, content) in files {
        let partial = partial_path(path);
        if let Err(e) = std::fs::write(&partial, content) {
            discard(staged.iter().chain(std::iter::once(&partial)));
            return Err(e);
        }
        staged.push(partial);
    }

    let mut written = Vec::with_capacity(files.len());
    for (i, (partial, (path, _))) in staged.iter().zip(files).enumerate() {
        if let Err(e) = std::fs::rename(partial, path) {
            discard(&staged[i..]);
            return Err(e);
        }
        log::debug!("Wrote {}", path.display());
        written.push(path.clone());
    }
    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn discard<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) {
    for path in paths {
        if path.is_file() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_files_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            (dir.path().join("a/one.txt"), "1\n".to_string()),
            (dir.path().join("a/b/two.txt"), "2\n".to_string()),
        ];
        let written = write_files(&files).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(&written[1]).unwrap(), "2\n");
        assert!(!partial_path(&written[0]).exists());
    }

    #[test]
    fn test_failed_write_leaves_no_targets() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.txt");
        let second = dir.path().join("two.txt");
        // A directory where the second partial file should go.
        std::fs::create_dir(partial_path(&second)).unwrap();

        let files = vec![(first.clone(), "1".to_string()), (second.clone(), "2".to_string())];
        assert!(write_files(&files).is_err());
        assert!(!first.exists());
        assert!(!partial_path(&first).exists());
        assert!(!second.exists());
    }
}
