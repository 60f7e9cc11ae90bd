//! On-disk binding table for one channel account.
//!
//! Written as `{"version": 1, "bindings": [...]}` via write-then-rename so a
//! crash mid-write never leaves a truncated file.  A bare JSON array is also
//! accepted on load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};

use crate::record::ThreadBindingRecord;

pub const BINDING_FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct BindingFileRef<'a> {
    version: u32,
    bindings: &'a [ThreadBindingRecord],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BindingFileContents {
    Versioned {
        #[serde(default)]
        version: Option<u32>,
        #[serde(default)]
        bindings: Vec<serde_json::Value>,
    },
    Bare(Vec<serde_json::Value>),
}

#[derive(Debug, Clone)]
pub struct BindingFile {
    path: PathBuf,
}

impl BindingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table.  A missing or empty file is an empty table; records
    /// that fail to parse are skipped with a warning.
    pub fn load(&self) -> Result<Vec<ThreadBindingRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let values = match serde_json::from_str::<BindingFileContents>(&raw)? {
            BindingFileContents::Versioned { version, bindings } => {
                if let Some(v) = version.filter(|v| *v > BINDING_FILE_VERSION) {
                    tracing::warn!(
                        path = %self.path.display(),
                        version = v,
                        "binding file written by a newer version; reading known fields only"
                    );
                }
                bindings
            }
            BindingFileContents::Bare(bindings) => bindings,
        };

        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<ThreadBindingRecord>(value) {
                Ok(rec) if !rec.thread_id.trim().is_empty() => records.push(rec),
                Ok(_) => tracing::warn!(path = %self.path.display(), "skipping binding without thread id"),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "skipping malformed binding record"
                ),
            }
        }
        Ok(records)
    }

    pub fn save(&self, records: &[ThreadBindingRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(&BindingFileRef {
            version: BINDING_FILE_VERSION,
            bindings: records,
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Move an unreadable file aside so the next save does not clobber it.
    pub fn quarantine(&self) -> Option<PathBuf> {
        let bad = self.path.with_extension("json.bad");
        match std::fs::rename(&self.path, &bad) {
            Ok(()) => Some(bad),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to quarantine binding file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_record;

    #[test]
    fn missing_and_empty_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = BindingFile::new(dir.path().join("discord/default.json"));
        assert!(file.load().unwrap().is_empty());

        std::fs::create_dir_all(dir.path().join("discord")).unwrap();
        std::fs::write(file.path(), "  \n").unwrap();
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = BindingFile::new(dir.path().join("bindings/discord/default.json"));
        let records = vec![sample_record("t1", "k1"), sample_record("t2", "k2")];
        file.save(&records).unwrap();

        assert_eq!(file.load().unwrap(), records);
        assert!(!file.path().with_extension("json.tmp").exists());
        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("\"targetSessionKey\""));
    }

    #[test]
    fn bare_array_and_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        let good = serde_json::to_value(sample_record("t1", "k1")).unwrap();
        let raw = serde_json::json!([good, {"threadId": "t2"}]);
        std::fs::write(&path, raw.to_string()).unwrap();

        let loaded = BindingFile::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].thread_id, "t1");
    }

    #[test]
    fn corrupt_file_errors_and_can_be_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        std::fs::write(&path, "{not json").unwrap();
        let file = BindingFile::new(&path);
        assert!(file.load().is_err());

        let bad = file.quarantine().unwrap();
        assert!(bad.exists());
        assert!(!path.exists());
    }
}
