//! On-disk layout of one feature's storage.
//!
//! ```text
//! <root>/<feature>-pending-v<N>/   batches written while consent is pending
//! <root>/<feature>-v<N>/           batches that may be uploaded
//! <root>/<feature>-consent.json    last consent decision (CLI/state file)
//! ```

use std::path::{Path, PathBuf};

use tb_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    feature: String,
    version: u32,
}

impl StorageLayout {
    /// Feature names become directory names: ASCII letters, digits, `-`, `_`.
    pub fn new(root: impl Into<PathBuf>, feature: &str, version: u32) -> Result<Self> {
        let valid = !feature.is_empty()
            && feature
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidConfig(format!(
                "invalid feature name: {:?}",
                feature
            )));
        }
        Ok(StorageLayout {
            root: root.into(),
            feature: feature.to_string(),
            version,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root
            .join(format!("{}-pending-v{}", self.feature, self.version))
    }

    pub fn granted_dir(&self) -> PathBuf {
        self.root.join(format!("{}-v{}", self.feature, self.version))
    }

    pub fn consent_state_file(&self) -> PathBuf {
        self.root.join(format!("{}-consent.json", self.feature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_names() {
        let layout = StorageLayout::new("/data/telebuf", "logs", 2).unwrap();
        assert_eq!(layout.pending_dir(), PathBuf::from("/data/telebuf/logs-pending-v2"));
        assert_eq!(layout.granted_dir(), PathBuf::from("/data/telebuf/logs-v2"));
        assert_eq!(
            layout.consent_state_file(),
            PathBuf::from("/data/telebuf/logs-consent.json")
        );
    }

    #[test]
    fn test_feature_name_must_be_a_plain_name() {
        for bad in ["", "../logs", "logs/v2", "logs v2"] {
            assert!(StorageLayout::new("/data", bad, 2).is_err(), "{:?}", bad);
        }
        assert!(StorageLayout::new("/data", "session_replay-resources", 2).is_ok());
    }
}
