use super::Fetcher;
use crate::errors::Result;
use crate::file_tree::{DirTree, FileTree};
use std::path::Path;

/// Fetches a profile that already lives in a local directory.
pub struct DirFetcher;

impl Fetcher for DirFetcher {
    fn name(&self) -> &'static str {
        "local-directory"
    }

    fn handles(&self, target: &str) -> bool {
        Path::new(target).is_dir()
    }

    fn fetch(&self, target: &str) -> Result<Box<dyn FileTree>> {
        Ok(Box::new(DirTree::new(Path::new(target))?))
    }
}
