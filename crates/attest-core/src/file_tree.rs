//! Materialized, read-only views of a profile's file tree.
//!
//! A fetcher produces one of two concrete trees: [`DirTree`] over a real
//! directory, or [`MemTree`] holding extracted archive contents in memory.
//! Both expose the same ordered, relative-path view; nothing mutates a
//! tree once it is handed to a source reader.

use crate::errors::{ProfileError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub trait FileTree: std::fmt::Debug {
    /// Logical base of the tree, for diagnostics (a directory path or the
    /// archive the tree was extracted from).
    fn prefix(&self) -> &str;

    /// Ordered list of relative file paths, `/`-separated.
    fn files(&self) -> &[String];

    /// Absolute on-disk path for a listed file, when one exists.
    fn abs_path(&self, rel: &str) -> Option<PathBuf>;

    /// Read the contents of a listed file.
    fn read(&self, rel: &str) -> Result<Vec<u8>>;

    /// On-disk root, when the tree is directory-backed.
    fn root_path(&self) -> Option<&Path> {
        None
    }

    fn contains(&self, rel: &str) -> bool {
        self.files().iter().any(|f| f == rel)
    }

    /// Read a listed file as UTF-8 text.
    fn read_to_string(&self, rel: &str) -> Result<String> {
        let bytes = self.read(rel)?;
        String::from_utf8(bytes).map_err(|e| ProfileError::Read {
            path: PathBuf::from(rel),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

/// A tree backed by a directory on disk.
#[derive(Debug)]
pub struct DirTree {
    root: PathBuf,
    prefix: String,
    files: Vec<String>,
}

impl DirTree {
    pub fn new(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| ProfileError::Fetch {
                target: root.display().to_string(),
                reason: format!("failed to walk directory: {e}"),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| ProfileError::Fetch {
                    target: root.display().to_string(),
                    reason: format!("failed to compute relative path: {e}"),
                })?;
            files.push(path_to_slash(rel));
        }
        files.sort();
        Ok(Self {
            prefix: root.display().to_string(),
            root: root.to_path_buf(),
            files,
        })
    }
}

impl FileTree for DirTree {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn files(&self) -> &[String] {
        &self.files
    }

    fn abs_path(&self, rel: &str) -> Option<PathBuf> {
        if self.contains(rel) {
            Some(self.root.join(rel))
        } else {
            None
        }
    }

    fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.root.join(rel);
        std::fs::read(&path).map_err(|source| ProfileError::Read { path, source })
    }

    fn root_path(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// A tree held entirely in memory, produced by archive extraction.
///
/// Archives commonly wrap the profile in a single top-level directory
/// (`profile-1.0.0/inspec.yml`); the constructor strips such a wrapper so
/// readers always see the canonical layout at the root.
#[derive(Debug)]
pub struct MemTree {
    prefix: String,
    entries: BTreeMap<String, Vec<u8>>,
    files: Vec<String>,
}

impl MemTree {
    pub fn new(prefix: impl Into<String>, mut entries: BTreeMap<String, Vec<u8>>) -> Self {
        if let Some(wrapper) = sole_wrapper_dir(&entries) {
            entries = entries
                .into_iter()
                .map(|(k, v)| (k[wrapper.len() + 1..].to_string(), v))
                .collect();
        }
        let files: Vec<String> = entries.keys().cloned().collect();
        Self {
            prefix: prefix.into(),
            entries,
            files,
        }
    }
}

impl FileTree for MemTree {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn files(&self) -> &[String] {
        &self.files
    }

    fn abs_path(&self, _rel: &str) -> Option<PathBuf> {
        None
    }

    fn read(&self, rel: &str) -> Result<Vec<u8>> {
        self.entries
            .get(rel)
            .cloned()
            .ok_or_else(|| ProfileError::Read {
                path: PathBuf::from(rel),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such entry"),
            })
    }
}

/// The single top-level directory wrapping every entry, if there is one.
fn sole_wrapper_dir(entries: &BTreeMap<String, Vec<u8>>) -> Option<String> {
    let mut wrapper: Option<&str> = None;
    for key in entries.keys() {
        let (top, rest) = key.split_once('/')?;
        if rest.is_empty() {
            return None;
        }
        match wrapper {
            None => wrapper = Some(top),
            Some(w) if w == top => {}
            Some(_) => return None,
        }
    }
    wrapper.map(|w| w.to_string())
}

fn path_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(entries: &[(&str, &str)]) -> MemTree {
        MemTree::new(
            "test.tar.gz",
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        )
    }

    #[test]
    fn mem_tree_lists_files_sorted() {
        let tree = mem(&[("inspec.yml", "name: x"), ("controls/a.rb", "")]);
        assert_eq!(tree.files(), &["controls/a.rb", "inspec.yml"]);
    }

    #[test]
    fn mem_tree_strips_single_wrapper_dir() {
        let tree = mem(&[
            ("prof-1.0.0/inspec.yml", "name: x"),
            ("prof-1.0.0/controls/a.rb", ""),
        ]);
        assert!(tree.contains("inspec.yml"));
        assert_eq!(tree.read("inspec.yml").unwrap(), b"name: x");
    }

    #[test]
    fn mem_tree_keeps_mixed_roots_intact() {
        let tree = mem(&[("a/inspec.yml", ""), ("b/other.txt", "")]);
        assert!(tree.contains("a/inspec.yml"));
        assert!(tree.contains("b/other.txt"));
    }

    #[test]
    fn dir_tree_walks_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("controls")).unwrap();
        std::fs::write(dir.path().join("inspec.yml"), "name: p").unwrap();
        std::fs::write(dir.path().join("controls/a.rb"), "control").unwrap();

        let tree = DirTree::new(dir.path()).unwrap();
        assert_eq!(tree.files(), &["controls/a.rb", "inspec.yml"]);
        assert_eq!(tree.read("inspec.yml").unwrap(), b"name: p");
        assert!(tree.abs_path("inspec.yml").unwrap().ends_with("inspec.yml"));
        assert!(tree.abs_path("missing.yml").is_none());
    }
}
