// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout under the data directory.
//!
//! ```text
//! <root>/
//!   device.redb                # installation salt/id, per-user salts, remember blob
//!   namespaces/<ns>.redb       # encrypted records, outbox, search tokens
//!   capability/<ns>.redb       # higher-capability medical database
//! ```

use std::path::{Path, PathBuf};

use crate::crypto::Namespace;

/// Default data directory when `DATA_DIR` is unset.
pub const DATA_ROOT: &str = "./data";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Device-scoped key/value database (survives logout).
    pub fn device_db(&self) -> PathBuf {
        self.root.join("device.redb")
    }

    pub fn namespaces_dir(&self) -> PathBuf {
        self.root.join("namespaces")
    }

    /// Local store database for one namespace.
    pub fn namespace_db(&self, namespace: &Namespace) -> PathBuf {
        self.namespaces_dir()
            .join(format!("{}.redb", namespace.as_str()))
    }

    pub fn capability_dir(&self) -> PathBuf {
        self.root.join("capability")
    }

    /// Higher-capability database for one namespace.
    pub fn capability_db(&self, namespace: &Namespace) -> PathBuf {
        self.capability_dir()
            .join(format!("{}.redb", namespace.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
    }

    #[test]
    fn namespace_files_are_partitioned() {
        let paths = StoragePaths::new("/tmp/pv");
        let ns = Namespace::parse("pinvault_0123456789abcdef01234567").unwrap();
        assert_eq!(
            paths.namespace_db(&ns),
            PathBuf::from("/tmp/pv/namespaces/pinvault_0123456789abcdef01234567.redb")
        );
        assert_eq!(
            paths.capability_db(&ns),
            PathBuf::from("/tmp/pv/capability/pinvault_0123456789abcdef01234567.redb")
        );
        assert_eq!(paths.device_db(), PathBuf::from("/tmp/pv/device.redb"));
    }
}
