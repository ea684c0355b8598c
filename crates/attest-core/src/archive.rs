//! Deterministic packaging of a profile's file tree.
//!
//! Two runs over the same tree produce byte-identical tar.gz output:
//! entries are written in the supplied order with epoch mtimes, fixed
//! ownership, and mode 0644, and the gzip header carries no timestamp
//! or OS marker. Zip output normalizes entry timestamps the same way.

use crate::errors::Result;
use crate::file_tree::FileTree;
use flate2::{Compression, GzBuilder};
use std::io::Write;
use std::path::Path;
use tar::{Builder, Header};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveVariant {
    #[default]
    TarGz,
    Zip,
}

impl ArchiveVariant {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveVariant::TarGz => "tar.gz",
            ArchiveVariant::Zip => "zip",
        }
    }
}

pub struct ArchiveGenerator {
    variant: ArchiveVariant,
}

impl ArchiveGenerator {
    pub fn new(variant: ArchiveVariant) -> Self {
        Self { variant }
    }

    /// Package the tree into `destination`.
    pub fn generate(&self, tree: &dyn FileTree, destination: &Path) -> Result<()> {
        let bytes = self.generate_bytes(tree)?;
        std::fs::write(destination, bytes)?;
        Ok(())
    }

    /// Package the tree in memory.
    ///
    /// Files are added in the tree's order; entries whose basename
    /// starts with a dot are excluded. Paths inside the archive are
    /// relative to the tree root.
    pub fn generate_bytes(&self, tree: &dyn FileTree) -> Result<Vec<u8>> {
        match self.variant {
            ArchiveVariant::TarGz => self.tar_gz(tree),
            ArchiveVariant::Zip => self.zip(tree),
        }
    }

    fn tar_gz(&self, tree: &dyn FileTree) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let encoder = GzBuilder::new()
                .mtime(0)
                .operating_system(255)
                .write(&mut out, Compression::best());
            let mut tar = Builder::new(encoder);
            tar.mode(tar::HeaderMode::Deterministic);

            for path in included_files(tree) {
                let data = tree.read(path)?;
                write_entry(&mut tar, path, &data)?;
            }

            let encoder = tar.into_inner()?;
            encoder.finish()?;
        }
        Ok(out)
    }

    fn zip(&self, tree: &dyn FileTree) -> Result<Vec<u8>> {
        let mut out = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut out);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .last_modified_time(zip::DateTime::default())
                .unix_permissions(0o644);

            for path in included_files(tree) {
                let data = tree.read(path)?;
                writer
                    .start_file(path, options)
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                writer.write_all(&data)?;
            }
            writer
                .finish()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        Ok(out.into_inner())
    }
}

fn included_files(tree: &dyn FileTree) -> impl Iterator<Item = &String> {
    tree.files().iter().filter(|path| {
        let basename = path.rsplit('/').next().unwrap_or(path);
        !basename.starts_with('.')
    })
}

fn write_entry<W: Write>(tar: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
    tar.append(&header, data)?;
    Ok(())
}
