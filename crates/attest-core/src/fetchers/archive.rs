use super::Fetcher;
use crate::errors::{ProfileError, Result};
use crate::file_tree::{FileTree, MemTree};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};

/// Fetches a profile packaged as a local tar, tar.gz, or zip archive.
///
/// Contents are extracted into memory; entries whose paths would escape
/// the archive root are rejected rather than skipped.
pub struct ArchiveFetcher;

impl ArchiveFetcher {
    fn variant(target: &str) -> Option<ArchiveKind> {
        let lower = target.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

impl Fetcher for ArchiveFetcher {
    fn name(&self) -> &'static str {
        "local-archive"
    }

    fn handles(&self, target: &str) -> bool {
        Self::variant(target).is_some() && Path::new(target).is_file()
    }

    fn fetch(&self, target: &str) -> Result<Box<dyn FileTree>> {
        let kind = Self::variant(target).ok_or_else(|| ProfileError::Fetch {
            target: target.to_string(),
            reason: "not a recognized archive extension".to_string(),
        })?;
        let file = File::open(target).map_err(|e| ProfileError::Fetch {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let entries = match kind {
            ArchiveKind::Tar => read_tar(target, file),
            ArchiveKind::TarGz => read_tar(target, GzDecoder::new(file)),
            ArchiveKind::Zip => read_zip(target, file),
        }?;

        Ok(Box::new(MemTree::new(target, entries)))
    }
}

fn read_tar<R: Read>(target: &str, reader: R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = BTreeMap::new();

    let iter = archive.entries().map_err(|e| ProfileError::Fetch {
        target: target.to_string(),
        reason: format!("failed to read archive: {e}"),
    })?;
    for entry in iter {
        let mut entry = entry.map_err(|e| ProfileError::Fetch {
            target: target.to_string(),
            reason: format!("failed to read archive entry: {e}"),
        })?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| ProfileError::Fetch {
                target: target.to_string(),
                reason: format!("invalid entry path: {e}"),
            })?
            .to_path_buf();
        check_contained(target, &path)?;

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(|e| ProfileError::Fetch {
            target: target.to_string(),
            reason: format!("failed to extract '{}': {e}", path.display()),
        })?;
        entries.insert(slash_path(&path), data);
    }

    Ok(entries)
}

fn read_zip(target: &str, file: File) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ProfileError::Fetch {
        target: target.to_string(),
        reason: format!("failed to read zip archive: {e}"),
    })?;
    let mut entries = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ProfileError::Fetch {
            target: target.to_string(),
            reason: format!("failed to read zip entry: {e}"),
        })?;
        if entry.is_dir() {
            continue;
        }
        let path = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            ProfileError::Fetch {
                target: target.to_string(),
                reason: format!("zip entry '{}' escapes the archive root", entry.name()),
            }
        })?;

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(|e| ProfileError::Fetch {
            target: target.to_string(),
            reason: format!("failed to extract '{}': {e}", path.display()),
        })?;
        entries.insert(slash_path(&path), data);
    }

    Ok(entries)
}

/// Reject absolute paths and parent-directory components.
fn check_contained(target: &str, path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ProfileError::Fetch {
                    target: target.to_string(),
                    reason: format!("entry '{}' escapes the archive root", path.display()),
                })
            }
        }
    }
    Ok(())
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_tar_gz(dest: &Path, files: &[(&str, &str)]) {
        let file = File::create(dest).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_tar_gz_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("profile.tar.gz");
        write_tar_gz(
            &archive,
            &[("inspec.yml", "name: p"), ("controls/a.rb", "# controls")],
        );

        let fetcher = ArchiveFetcher;
        let target = archive.to_str().unwrap();
        assert!(fetcher.handles(target));
        let tree = fetcher.fetch(target).unwrap();
        assert_eq!(tree.read("inspec.yml").unwrap(), b"name: p");
    }

    #[test]
    fn extracts_zip_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer.start_file("inspec.yml", options).unwrap();
        writer.write_all(b"name: z").unwrap();
        writer.finish().unwrap();

        let fetcher = ArchiveFetcher;
        let tree = fetcher.fetch(path.to_str().unwrap()).unwrap();
        assert_eq!(tree.read("inspec.yml").unwrap(), b"name: z");
    }

    #[test]
    fn does_not_handle_missing_files() {
        assert!(!ArchiveFetcher.handles("/nonexistent/profile.tar.gz"));
    }
}
