//! Sources of manifest and interface text. Separate from [`crate::deployment`]
//! so tests can supply fixtures without touching a filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Resolves a module type to its manifest text and an interface name to its
/// interface text. Interfaces are looked up independently of module type:
/// they're shared contracts, not something any one module manifest owns.
pub trait ManifestSource {
    fn module_manifest_text(&self, module_type: &str) -> ConfigResult<String>;
    fn interface_text(&self, interface_name: &str) -> ConfigResult<String>;
}

/// Reads `<modules_dir>/<module_type>/manifest.json` and
/// `<interfaces_dir>/<interface_name>.json`, mirroring the on-disk layout a
/// deployed runtime directory uses.
pub struct FilesystemManifestSource {
    modules_dir: PathBuf,
    interfaces_dir: PathBuf,
}

impl FilesystemManifestSource {
    #[must_use]
    pub fn new(modules_dir: impl Into<PathBuf>, interfaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            interfaces_dir: interfaces_dir.into(),
        }
    }

    fn read(path: &Path, what: &'static str) -> ConfigResult<String> {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            what,
            path: path.display().to_string(),
            source,
        })
    }
}

impl ManifestSource for FilesystemManifestSource {
    fn module_manifest_text(&self, module_type: &str) -> ConfigResult<String> {
        let path = self.modules_dir.join(module_type).join("manifest.json");
        Self::read(&path, "module manifest")
    }

    fn interface_text(&self, interface_name: &str) -> ConfigResult<String> {
        let path = self.interfaces_dir.join(format!("{interface_name}.json"));
        Self::read(&path, "interface definition")
    }
}

/// An in-memory source backed by two name→text maps, for tests.
#[derive(Default)]
pub struct MockManifestSource {
    manifests: HashMap<String, String>,
    interfaces: HashMap<String, String>,
}

impl MockManifestSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_manifest(mut self, module_type: impl Into<String>, text: impl Into<String>) -> Self {
        self.manifests.insert(module_type.into(), text.into());
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.interfaces.insert(interface_name.into(), text.into());
        self
    }
}

impl ManifestSource for MockManifestSource {
    fn module_manifest_text(&self, module_type: &str) -> ConfigResult<String> {
        self.manifests.get(module_type).cloned().ok_or_else(|| ConfigError::Io {
            what: "module manifest",
            path: module_type.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no manifest registered"),
        })
    }

    fn interface_text(&self, interface_name: &str) -> ConfigResult<String> {
        self.interfaces.get(interface_name).cloned().ok_or_else(|| ConfigError::Io {
            what: "interface definition",
            path: interface_name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no interface registered"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_source_reads_manifest_and_interface_from_their_conventional_paths() {
        let modules_dir = tempfile::tempdir().unwrap();
        let interfaces_dir = tempfile::tempdir().unwrap();

        let module_dir = modules_dir.path().join("evse_module");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("manifest.json"), "{}").unwrap();
        std::fs::write(interfaces_dir.path().join("evse.json"), "{}").unwrap();

        let source = FilesystemManifestSource::new(modules_dir.path(), interfaces_dir.path());
        assert_eq!(source.module_manifest_text("evse_module").unwrap(), "{}");
        assert_eq!(source.interface_text("evse").unwrap(), "{}");
    }

    #[test]
    fn filesystem_source_reports_missing_manifest() {
        let modules_dir = tempfile::tempdir().unwrap();
        let interfaces_dir = tempfile::tempdir().unwrap();
        let source = FilesystemManifestSource::new(modules_dir.path(), interfaces_dir.path());
        assert!(matches!(source.module_manifest_text("ghost"), Err(ConfigError::Io { .. })));
    }
}
