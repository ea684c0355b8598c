//! Fetcher registry: maps a target reference to a materialized file tree.
//!
//! Fetchers are probed in registration order; the first one that claims a
//! target materializes it. The built-in set covers local directories and
//! local archives. Remote transports (url, git, supermarket) plug in
//! through the same trait and are deliberately not shipped by the core.

mod archive;
mod dir;

pub use archive::ArchiveFetcher;
pub use dir::DirFetcher;

use crate::errors::{ProfileError, Result};
use crate::file_tree::FileTree;
use std::sync::OnceLock;

pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this fetcher understands the target reference.
    fn handles(&self, target: &str) -> bool;

    /// Materialize the target into a read-only file tree.
    ///
    /// Fetchers are idempotent for a given target within one process.
    fn fetch(&self, target: &str) -> Result<Box<dyn FileTree>>;
}

/// Ordered collection of fetchers, probed front to back.
pub struct FetcherRegistry {
    fetchers: Vec<Box<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn empty() -> Self {
        Self {
            fetchers: Vec::new(),
        }
    }

    /// The built-in set: local directory, then local archive.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(DirFetcher));
        registry.register(Box::new(ArchiveFetcher));
        registry
    }

    pub fn register(&mut self, fetcher: Box<dyn Fetcher>) {
        self.fetchers.push(fetcher);
    }

    /// First fetcher claiming the target, or a fetch error naming it.
    pub fn resolve(&self, target: &str) -> Result<&dyn Fetcher> {
        self.fetchers
            .iter()
            .map(|f| f.as_ref())
            .find(|f| f.handles(target))
            .ok_or_else(|| ProfileError::Fetch {
                target: target.to_string(),
                reason: "no fetcher understands this target".to_string(),
            })
    }

    pub fn fetch(&self, target: &str) -> Result<Box<dyn FileTree>> {
        self.resolve(target)?.fetch(target)
    }
}

static REGISTRY: OnceLock<FetcherRegistry> = OnceLock::new();

/// Process-wide registry, initialized with the built-ins on first use.
pub fn registry() -> &'static FetcherRegistry {
    REGISTRY.get_or_init(FetcherRegistry::with_defaults)
}

/// Install a custom registry before the first `for_target` call.
///
/// Returns false when the registry was already frozen.
pub fn install(custom: FetcherRegistry) -> bool {
    REGISTRY.set(custom).is_ok()
}
