//! Durable per-page progress records.
//!
//! Each page owns one JSON file, `page_NNNN.json`, under the checkpoint
//! directory. Saves go through a uniquely named temp file followed by a
//! rename, so a reader observes either the previous record or the complete
//! new one. A record that fails to parse is logged and treated as absent;
//! the page is simply recomputed.

use crate::error::{HanscanError, Result};
use crate::types::{CheckpointRecord, Stage};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CheckpointStore {
    dir: PathBuf,
    /// Fingerprint of the engine-affecting configuration. Records written
    /// under a different configuration are stale and ignored on load.
    fingerprint: String,
}

impl CheckpointStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: &Path, fingerprint: String) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            HanscanError::checkpoint_with_source(
                format!("Failed to create checkpoint directory {}", dir.display()),
                e,
            )
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            fingerprint,
        })
    }

    fn record_path(&self, page_index: u32) -> PathBuf {
        self.dir.join(format!("page_{page_index:04}.json"))
    }

    /// Persist a record atomically. The fingerprint and timestamp are
    /// stamped here so callers never write a record the store would later
    /// reject as stale.
    pub fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let mut record = record.clone();
        record.config_fingerprint = self.fingerprint.clone();
        record.updated_at_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let serialized = serde_json::to_vec_pretty(&record)?;

        let pid = std::process::id();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_path = self
            .dir
            .join(format!("page_{:04}.tmp.{pid}.{timestamp}", record.page_index));

        fs::write(&temp_path, &serialized).map_err(|e| {
            HanscanError::checkpoint_with_source(
                format!("Failed to write temp checkpoint for page {}", record.page_index),
                e,
            )
        })?;

        fs::rename(&temp_path, self.record_path(record.page_index)).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            HanscanError::checkpoint_with_source(
                format!("Failed to commit checkpoint for page {}", record.page_index),
                e,
            )
        })?;

        tracing::debug!(page = record.page_index, stage = ?record.stage, "checkpoint saved");
        Ok(())
    }

    /// Load a page's record. Returns `None` when no record exists, when the
    /// record is unreadable (it will be recomputed), or when it was written
    /// under a different configuration.
    pub fn load(&self, page_index: u32) -> Option<CheckpointRecord> {
        let path = self.record_path(page_index);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(page = page_index, error = %e, "checkpoint unreadable, page will be recomputed");
                return None;
            }
        };

        let record: CheckpointRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(page = page_index, error = %e, "checkpoint corrupt, page will be recomputed");
                return None;
            }
        };

        if record.config_fingerprint != self.fingerprint {
            tracing::info!(
                page = page_index,
                "checkpoint written under a different configuration, page will be recomputed"
            );
            return None;
        }

        Some(record)
    }

    /// Pages whose persisted stage satisfies `min_stage`. Unreadable or
    /// stale records are simply not listed.
    pub fn list_completed(&self, min_stage: Stage) -> Result<BTreeSet<u32>> {
        let mut completed = BTreeSet::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            HanscanError::checkpoint_with_source(
                format!("Failed to read checkpoint directory {}", self.dir.display()),
                e,
            )
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                HanscanError::checkpoint_with_source("Failed to enumerate checkpoint entry", e)
            })?;
            let name = entry.file_name();
            let Some(index) = parse_record_name(&name.to_string_lossy()) else {
                continue;
            };
            if let Some(record) = self.load(index)
                && record.stage.satisfies(min_stage)
            {
                completed.insert(index);
            }
        }
        Ok(completed)
    }

    /// Drop a page's record, forcing recomputation on the next run. Absence
    /// is not an error.
    pub fn remove(&self, page_index: u32) -> Result<()> {
        match fs::remove_file(self.record_path(page_index)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HanscanError::checkpoint_with_source(
                format!("Failed to remove checkpoint for page {page_index}"),
                e,
            )),
        }
    }
}

/// `page_0001.json` -> `1`. Temp files and foreign files yield `None`.
fn parse_record_name(name: &str) -> Option<u32> {
    let stem = name.strip_prefix("page_")?.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
