//! In-memory module store for profile helper libraries.
//!
//! Embedded profiles carry their libraries inside the file tree, so
//! `require` must be answerable without touching disk. Logical paths are
//! stored without the `.rb` extension, matching how evaluated code names
//! them. There is no eviction.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Module {
    bytes: Vec<u8>,
    source_ref: String,
    start_line: usize,
    loaded: bool,
}

#[derive(Debug, Default)]
pub struct LibraryLoader {
    modules: BTreeMap<String, Module>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        logical_path: &str,
        bytes: Vec<u8>,
        source_ref: impl Into<String>,
        start_line: usize,
    ) {
        self.modules.insert(
            normalize(logical_path),
            Module {
                bytes,
                source_ref: source_ref.into(),
                start_line,
                loaded: false,
            },
        );
    }

    pub fn exists(&self, logical_path: &str) -> bool {
        self.modules.contains_key(&normalize(logical_path))
    }

    pub fn loaded(&self, logical_path: &str) -> bool {
        self.modules
            .get(&normalize(logical_path))
            .is_some_and(|m| m.loaded)
    }

    /// Fetch a module's contents and mark it loaded.
    ///
    /// Returns `None` for unknown paths; callers fall through to the
    /// host loader in that case.
    pub fn load(&mut self, logical_path: &str) -> Option<(&[u8], &str, usize)> {
        let module = self.modules.get_mut(&normalize(logical_path))?;
        module.loaded = true;
        Some((&module.bytes, &module.source_ref, module.start_line))
    }

    /// Logical paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

fn normalize(logical_path: &str) -> String {
    logical_path
        .strip_suffix(".rb")
        .unwrap_or(logical_path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_marks_module_loaded() {
        let mut loader = LibraryLoader::new();
        loader.add("helper.rb", b"def help; end".to_vec(), "libraries/helper.rb", 1);

        assert!(loader.exists("helper"));
        assert!(!loader.loaded("helper"));

        let (bytes, source_ref, line) = loader.load("helper").unwrap();
        assert_eq!(bytes, b"def help; end");
        assert_eq!(source_ref, "libraries/helper.rb");
        assert_eq!(line, 1);
        assert!(loader.loaded("helper"));
    }

    #[test]
    fn extension_is_ignored_in_lookups() {
        let mut loader = LibraryLoader::new();
        loader.add("util", b"x".to_vec(), "libraries/util.rb", 1);
        assert!(loader.exists("util.rb"));
        assert!(loader.load("util.rb").is_some());
        assert!(loader.loaded("util"));
    }

    #[test]
    fn unknown_path_is_none() {
        let mut loader = LibraryLoader::new();
        assert!(loader.load("ghost").is_none());
        assert!(!loader.exists("ghost"));
    }
}
