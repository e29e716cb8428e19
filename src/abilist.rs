//! Category membership for functions and call sites.
//!
//! The lists answer one question: does entity E belong to category C? An
//! entity is a function, matched by name, or a call instruction, matched by
//! its callee's name. Anything else answers No, as does any unknown category.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Byte-comparison helpers such as `memcmp` and `strcmp`.
pub const COMPARE_FUNC: &str = "cmpfn";
/// Functions whose completion signals a listening socket is ready.
pub const SOCKET_READY: &str = "socket";
/// Taint sources: calls where fuzzer input materializes.
pub const SOURCE: &str = "source";
/// Taint sinks: dangerous operations the fuzzer steers toward.
pub const SINK: &str = "sink";
/// Exploitation tag covering every argument.
pub const EXPLOIT_ALL: &str = "all";
/// Per-argument exploitation tags `i0`..`i4`.
pub const EXPLOIT_ARG: [&str; 5] = ["i0", "i1", "i2", "i3", "i4"];

/// An error reading a category list file.
#[derive(Debug, Error)]
#[error("failed to read category list {path}: {source}")]
pub struct CategoryListError {
    /// The offending file.
    pub path: PathBuf,
    /// The underlying I/O error.
    #[source]
    pub source: io::Error,
}

/// A set of `(function name, category)` memberships loaded from list files.
#[derive(Debug, Default, Clone)]
pub struct CategoryList {
    entries: HashMap<String, BTreeSet<String>>,
}

impl CategoryList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge the given list files.
    ///
    /// Each line reads `fun:NAME=category`; blank lines and `#` comments are
    /// skipped. Lines in any other shape are ignored, matching the lax
    /// special-case-list format the lists are written in.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, CategoryListError> {
        let mut list = Self::new();
        for path in paths {
            let path = path.as_ref();
            let text = fs::read_to_string(path).map_err(|source| CategoryListError {
                path: path.to_path_buf(),
                source,
            })?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("fun:") {
                    if let Some((name, category)) = rest.split_once('=') {
                        list.insert(name.trim(), category.trim());
                    }
                }
            }
        }
        Ok(list)
    }

    /// Record that `name` belongs to `category`.
    pub fn insert(&mut self, name: &str, category: &str) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .insert(category.to_string());
    }

    /// Does the function named `name` belong to `category`?
    pub fn contains(&self, name: &str, category: &str) -> bool {
        self.entries
            .get(name)
            .map_or(false, |cats| cats.contains(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn membership() {
        let mut list = CategoryList::new();
        list.insert("memcmp", COMPARE_FUNC);
        list.insert("memcmp", EXPLOIT_ARG[2]);
        assert!(list.contains("memcmp", "cmpfn"));
        assert!(list.contains("memcmp", "i2"));
        assert!(!list.contains("memcmp", "sink"));
        assert!(!list.contains("strcmp", "cmpfn"));
        assert!(!list.contains("memcmp", "no-such-category"));
    }

    #[test]
    fn file_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# exploitation list").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "fun:system=sink").unwrap();
        writeln!(file, "fun:recvfrom = source").unwrap();
        writeln!(file, "something unparseable").unwrap();
        file.flush().unwrap();

        let list = CategoryList::from_files(&[file.path()]).unwrap();
        assert!(list.contains("system", SINK));
        assert!(list.contains("recvfrom", SOURCE));
    }

    #[test]
    fn missing_file() {
        let err = CategoryList::from_files(&["/no/such/list.txt"]).unwrap_err();
        assert!(err.to_string().contains("/no/such/list.txt"));
    }
}
