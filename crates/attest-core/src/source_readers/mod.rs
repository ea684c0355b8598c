//! Source reader registry: maps a materialized tree to canonical accessors.
//!
//! Mirrors the fetcher registry's probe-and-resolve pattern: reader kinds
//! are tried in registration order against the tree's layout signatures.

mod canonical;

pub use canonical::CanonicalReader;

use crate::errors::{ProfileError, Result};
use crate::file_tree::FileTree;
use crate::metadata::Metadata;
use std::sync::OnceLock;

/// A helper library file declared by the profile.
#[derive(Debug, Clone)]
pub struct Library {
    /// Path relative to the tree prefix, e.g. `libraries/helper.rb`.
    pub path: String,
    pub bytes: Vec<u8>,
    /// Where the bytes came from, for diagnostics.
    pub source_ref: String,
    pub start_line: usize,
}

pub trait SourceReader {
    /// Parsed (not yet finalized) manifest.
    fn metadata(&self) -> &Metadata;

    /// Control files, ordered by relative path.
    fn tests(&self) -> Result<Vec<(String, Vec<u8>)>>;

    /// Helper libraries, ordered by relative path.
    fn libraries(&self) -> Result<Vec<Library>>;

    /// The tree this reader was built over.
    fn target(&self) -> &dyn FileTree;

    /// Deprecation warnings picked up while probing the layout.
    fn warnings(&self) -> &[String];
}

/// A reader kind knows how to recognize a layout and build a reader for it.
pub trait ReaderKind: Send + Sync {
    fn name(&self) -> &'static str;
    fn handles(&self, tree: &dyn FileTree) -> bool;
    fn build(&self, tree: Box<dyn FileTree>) -> Result<Box<dyn SourceReader>>;
}

pub struct SourceReaderRegistry {
    kinds: Vec<Box<dyn ReaderKind>>,
}

impl SourceReaderRegistry {
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(canonical::CanonicalReaderKind));
        registry
    }

    pub fn register(&mut self, kind: Box<dyn ReaderKind>) {
        self.kinds.push(kind);
    }

    /// Build a reader with the first kind that recognizes the tree.
    pub fn resolve(&self, tree: Box<dyn FileTree>) -> Result<Box<dyn SourceReader>> {
        let kind = self
            .kinds
            .iter()
            .find(|k| k.handles(tree.as_ref()))
            .ok_or_else(|| ProfileError::Structure {
                location: tree.prefix().to_string(),
            })?;
        kind.build(tree)
    }
}

static REGISTRY: OnceLock<SourceReaderRegistry> = OnceLock::new();

/// Process-wide registry, initialized with the built-ins on first use.
pub fn registry() -> &'static SourceReaderRegistry {
    REGISTRY.get_or_init(SourceReaderRegistry::with_defaults)
}

/// Install a custom registry before the first `for_target` call.
pub fn install(custom: SourceReaderRegistry) -> bool {
    REGISTRY.set(custom).is_ok()
}
