//! Vendor index: a content-addressed on-disk cache of fetched profiles.
//!
//! Each cached profile is an unpacked tree in a directory named
//! `{name}-{version}-{sha256_prefix}`. Writers unpack into a temp
//! directory and rename into place, so concurrent readers never observe
//! a partial entry. Missing entries are tolerated; corrupt ones are not.

use crate::errors::{ProfileError, Result};
use crate::metadata::Metadata;
use crate::requirement::Requirement;
use crate::version::{parse_version, Version};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Length of the digest prefix in cache entry names.
const HASH_PREFIX_LEN: usize = 16;

/// A locally cached profile specification.
#[derive(Debug, Clone)]
pub struct LocalSpec {
    pub name: String,
    pub version: Version,
    /// Directory holding the unpacked tree.
    pub path: PathBuf,
    pub depends: Vec<Requirement>,
}

impl LocalSpec {
    /// Reconstruct a specification from an unpacked profile directory.
    pub fn from_dir(path: &Path) -> Result<Self> {
        let manifest = path.join("inspec.yml");
        let content =
            std::fs::read_to_string(&manifest).map_err(|e| ProfileError::Cache {
                path: path.to_path_buf(),
                reason: format!("missing or unreadable manifest: {e}"),
            })?;
        let mut metadata =
            Metadata::from_yaml("inspec.yml", &content).map_err(|e| ProfileError::Cache {
                path: path.to_path_buf(),
                reason: format!("manifest does not parse: {e}"),
            })?;
        metadata.finalize(None);

        let name = metadata
            .name()
            .ok_or_else(|| ProfileError::Cache {
                path: path.to_path_buf(),
                reason: "manifest has no name".to_string(),
            })?
            .to_string();
        let version = metadata
            .version()
            .and_then(|v| parse_version(v).ok())
            .ok_or_else(|| ProfileError::Cache {
                path: path.to_path_buf(),
                reason: "manifest has no parseable version".to_string(),
            })?;

        Ok(Self {
            name,
            version,
            path: path.to_path_buf(),
            depends: metadata.depends().to_vec(),
        })
    }

    /// Lazily construct a full profile over the cached tree.
    pub fn profile(&self) -> Result<crate::profile::Profile> {
        crate::profile::Profile::for_target(
            &self.path.display().to_string(),
            crate::profile::ProfileOptions::default(),
        )
    }
}

/// The on-disk cache. The root directory is created on first write.
#[derive(Debug, Clone)]
pub struct VendorIndex {
    root: PathBuf,
}

impl VendorIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached specifications matching the requirement's name and
    /// constraint, in ascending version order. Empty when none match.
    pub fn find(&self, requirement: &Requirement) -> Result<Vec<LocalSpec>> {
        let mut matching: Vec<LocalSpec> = self
            .list()?
            .into_iter()
            .filter(|spec| requirement.satisfied_by(&spec.name, &spec.version))
            .collect();
        matching.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(matching)
    }

    /// Every cached specification, in entry-name order.
    pub fn list(&self) -> Result<Vec<LocalSpec>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && !p
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        names.sort();
        names.iter().map(|p| self.load_path(p)).collect()
    }

    /// Reconstruct a specification from a cache entry path.
    ///
    /// Corruption here is fatal: a listed entry that no longer parses
    /// means the cache can no longer be trusted.
    pub fn load_path(&self, path: &Path) -> Result<LocalSpec> {
        LocalSpec::from_dir(path)
    }

    /// Materialize an archived profile under its deterministic name.
    ///
    /// Idempotent: an entry that already exists is left untouched.
    pub fn store(&self, name: &str, version: &Version, archive: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;

        let digest = hex::encode(Sha256::digest(archive));
        let entry_name = format!("{name}-{version}-{}", &digest[..HASH_PREFIX_LEN]);
        let dest = self.root.join(&entry_name);
        if dest.exists() {
            return Ok(dest);
        }

        let staging = self
            .root
            .join(format!(".staging-{entry_name}-{}", std::process::id()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let unpacked = (|| -> Result<()> {
            let mut tar = tar::Archive::new(GzDecoder::new(archive));
            tar.unpack(&staging)?;
            // Flush directory metadata before the entry becomes visible.
            if let Ok(dir) = File::open(&staging) {
                let _ = dir.sync_all();
            }
            Ok(())
        })();
        if let Err(e) = unpacked {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        match std::fs::rename(&staging, &dest) {
            Ok(()) => Ok(dest),
            Err(_) if dest.exists() => {
                // Another writer won the race; ours is redundant.
                let _ = std::fs::remove_dir_all(&staging);
                Ok(dest)
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionConstraint;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn profile_archive(name: &str, version: &str, depends_yaml: &str) -> Vec<u8> {
        let manifest = format!("name: {name}\nversion: {version}\n{depends_yaml}");
        let mut bytes = Vec::new();
        {
            let encoder = GzEncoder::new(&mut bytes, Compression::default());
            let mut tar = tar::Builder::new(encoder);
            let mut header = tar::Header::new_gnu();
            header.set_path("inspec.yml").unwrap();
            header.set_size(manifest.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, manifest.as_bytes()).unwrap();
            tar.into_inner().unwrap().finish().unwrap();
        }
        bytes
    }

    fn req(name: &str, constraint: &str) -> Requirement {
        Requirement::by_name(name)
            .with_constraint(VersionConstraint::parse(constraint).unwrap())
    }

    #[test]
    fn store_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("cache"));

        let archive = profile_archive("base", "1.2.0", "");
        let path = index
            .store("base", &Version::new(1, 2, 0), &archive)
            .unwrap();
        assert!(path.join("inspec.yml").is_file());

        let found = index.find(&req("base", ">= 1.0")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "base");
        assert_eq!(found[0].version, Version::new(1, 2, 0));
    }

    #[test]
    fn find_returns_ascending_versions() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("cache"));
        for version in ["2.0.0", "1.0.0", "1.5.0"] {
            let archive = profile_archive("multi", version, "");
            index
                .store("multi", &parse_version(version).unwrap(), &archive)
                .unwrap();
        }

        let found = index.find(&req("multi", ">= 1.0")).unwrap();
        let versions: Vec<String> = found.iter().map(|s| s.version.to_string()).collect();
        assert_eq!(versions, vec!["1.0.0", "1.5.0", "2.0.0"]);
    }

    #[test]
    fn find_filters_by_name_and_constraint() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("cache"));
        index
            .store(
                "a",
                &Version::new(1, 0, 0),
                &profile_archive("a", "1.0.0", ""),
            )
            .unwrap();
        index
            .store(
                "b",
                &Version::new(9, 0, 0),
                &profile_archive("b", "9.0.0", ""),
            )
            .unwrap();

        assert!(index.find(&req("a", ">= 2.0")).unwrap().is_empty());
        assert!(index.find(&req("missing", ">= 0.1")).unwrap().is_empty());
        assert_eq!(index.find(&req("b", "= 9.0.0")).unwrap().len(), 1);
    }

    #[test]
    fn store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("cache"));
        let archive = profile_archive("idem", "1.0.0", "");
        let first = index.store("idem", &Version::new(1, 0, 0), &archive).unwrap();
        let second = index.store("idem", &Version::new(1, 0, 0), &archive).unwrap();
        assert_eq!(first, second);
        assert_eq!(index.list().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_entry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        std::fs::create_dir_all(root.join("broken-1.0.0-deadbeefdeadbeef")).unwrap();
        let index = VendorIndex::new(&root);

        let err = index.find(&req("broken", ">= 0.1")).unwrap_err();
        assert!(matches!(err, ProfileError::Cache { .. }));
    }

    #[test]
    fn missing_root_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("never-created"));
        assert!(index.find(&req("x", ">= 0.1")).unwrap().is_empty());
    }

    #[test]
    fn cached_depends_are_exposed() {
        let dir = tempfile::tempdir().unwrap();
        let index = VendorIndex::new(dir.path().join("cache"));
        let archive = profile_archive(
            "wrapper",
            "1.0.0",
            "depends:\n  - name: base\n    version: '>= 1.0'\n",
        );
        index
            .store("wrapper", &Version::new(1, 0, 0), &archive)
            .unwrap();

        let found = index.find(&req("wrapper", ">= 1.0")).unwrap();
        assert_eq!(found[0].depends.len(), 1);
        assert_eq!(found[0].depends[0].name, "base");
    }
}
