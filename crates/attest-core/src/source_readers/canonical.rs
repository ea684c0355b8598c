use super::{Library, ReaderKind, SourceReader};
use crate::errors::{ProfileError, Result};
use crate::file_tree::FileTree;
use crate::metadata::Metadata;

const MANIFEST: &str = "inspec.yml";
const LEGACY_MANIFEST: &str = "metadata.rb";
const CONTROLS_DIR: &str = "controls/";
const LEGACY_CONTROLS_DIR: &str = "test/";
const LIBRARIES_DIR: &str = "libraries/";

/// Recognizes the canonical profile layout: a manifest at the root,
/// controls under `controls/`, libraries under `libraries/`.
pub struct CanonicalReaderKind;

impl ReaderKind for CanonicalReaderKind {
    fn name(&self) -> &'static str {
        "canonical"
    }

    fn handles(&self, tree: &dyn FileTree) -> bool {
        tree.contains(MANIFEST) || tree.contains(LEGACY_MANIFEST)
    }

    fn build(&self, tree: Box<dyn FileTree>) -> Result<Box<dyn SourceReader>> {
        Ok(Box::new(CanonicalReader::new(tree)?))
    }
}

pub struct CanonicalReader {
    tree: Box<dyn FileTree>,
    metadata: Metadata,
    warnings: Vec<String>,
}

impl CanonicalReader {
    pub fn new(tree: Box<dyn FileTree>) -> Result<Self> {
        let mut warnings = Vec::new();

        let metadata = if tree.contains(MANIFEST) {
            let content = tree.read_to_string(MANIFEST)?;
            Metadata::from_yaml(MANIFEST, &content)?
        } else if tree.contains(LEGACY_MANIFEST) {
            warnings.push(format!(
                "The '{LEGACY_MANIFEST}' manifest is deprecated; use '{MANIFEST}' instead"
            ));
            let content = tree.read_to_string(LEGACY_MANIFEST)?;
            Metadata::from_legacy(LEGACY_MANIFEST, &content)
        } else {
            return Err(ProfileError::Structure {
                location: tree.prefix().to_string(),
            });
        };

        if tree
            .files()
            .iter()
            .any(|f| f.starts_with(LEGACY_CONTROLS_DIR) && f.ends_with(".rb"))
        {
            warnings.push(format!(
                "Profile uses the deprecated '{LEGACY_CONTROLS_DIR}' directory for controls; use '{CONTROLS_DIR}' instead"
            ));
        }

        Ok(Self {
            tree,
            metadata,
            warnings,
        })
    }

    fn control_files(&self) -> Vec<String> {
        // Sorted because the tree's file list is sorted.
        self.tree
            .files()
            .iter()
            .filter(|f| {
                (f.starts_with(CONTROLS_DIR) || f.starts_with(LEGACY_CONTROLS_DIR))
                    && f.ends_with(".rb")
            })
            .cloned()
            .collect()
    }
}

impl SourceReader for CanonicalReader {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tests(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.control_files()
            .into_iter()
            .map(|path| {
                let bytes = self.tree.read(&path)?;
                Ok((path, bytes))
            })
            .collect()
    }

    fn libraries(&self) -> Result<Vec<Library>> {
        self.tree
            .files()
            .iter()
            .filter(|f| f.starts_with(LIBRARIES_DIR) && f.ends_with(".rb"))
            .map(|path| {
                let bytes = self.tree.read(path)?;
                Ok(Library {
                    path: path.clone(),
                    bytes,
                    source_ref: path.clone(),
                    start_line: 1,
                })
            })
            .collect()
    }

    fn target(&self) -> &dyn FileTree {
        self.tree.as_ref()
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_tree::MemTree;
    use std::collections::BTreeMap;

    fn tree(entries: &[(&str, &str)]) -> Box<dyn FileTree> {
        Box::new(MemTree::new(
            "fixture",
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect::<BTreeMap<_, _>>(),
        ))
    }

    #[test]
    fn reads_yaml_manifest_without_warnings() {
        let reader = CanonicalReader::new(tree(&[
            ("inspec.yml", "name: p\nversion: 1.0.0"),
            ("controls/a.rb", "# a"),
        ]))
        .unwrap();
        assert_eq!(reader.metadata().name(), Some("p"));
        assert!(reader.warnings().is_empty());
    }

    #[test]
    fn legacy_manifest_warns_but_loads() {
        let reader =
            CanonicalReader::new(tree(&[("metadata.rb", "name 'old-style'")])).unwrap();
        assert_eq!(reader.metadata().name(), Some("old-style"));
        assert!(reader.warnings()[0].contains("metadata.rb"));
    }

    #[test]
    fn legacy_test_dir_warns() {
        let reader = CanonicalReader::new(tree(&[
            ("inspec.yml", "name: p"),
            ("test/old.rb", "# old"),
        ]))
        .unwrap();
        assert!(reader.warnings().iter().any(|w| w.contains("test/")));
        let tests = reader.tests().unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].0, "test/old.rb");
    }

    #[test]
    fn tests_and_libraries_are_path_ordered() {
        let reader = CanonicalReader::new(tree(&[
            ("inspec.yml", "name: p"),
            ("controls/b.rb", "# b"),
            ("controls/a.rb", "# a"),
            ("libraries/zz.rb", "# zz"),
            ("libraries/aa.rb", "# aa"),
            ("libraries/nested/deep.rb", "# deep"),
        ]))
        .unwrap();
        let tests: Vec<String> = reader.tests().unwrap().into_iter().map(|t| t.0).collect();
        assert_eq!(tests, vec!["controls/a.rb", "controls/b.rb"]);
        let libs: Vec<String> = reader
            .libraries()
            .unwrap()
            .into_iter()
            .map(|l| l.path)
            .collect();
        assert_eq!(
            libs,
            vec!["libraries/aa.rb", "libraries/nested/deep.rb", "libraries/zz.rb"]
        );
    }
}
