// 📄 Document Store Backend - the whole master store as one JSON file
//
// Whole-store read → in-memory merge → whole-store write.
// The write goes to a temp file in the same directory and is renamed over
// the target, so a killed process leaves the previous file intact.
// Any input problem aborts before the write.

use crate::contact::MasterStore;
use crate::error::{Error, Result};
use crate::merge::{MergeEngine, MergeSummary};
use crate::record::Batch;
use chrono::NaiveDateTime;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

pub const DEFAULT_STORE_FILE: &str = "master_contact_database.json";

pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        DocumentStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the store; missing or malformed file → Input error
    pub fn load(&self) -> Result<MasterStore> {
        let bytes = fs::read(&self.path).map_err(|e| {
            Error::Input(format!("store file not readable: {} ({})", self.path.display(), e))
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::Input(format!("store file is not a valid master store: {} ({})", self.path.display(), e))
        })
    }

    /// Atomically replace the store file
    pub fn save(&self, store: &MasterStore) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, store)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Write a fresh empty store; refuses to overwrite an existing one
    pub fn create_empty(&self, now: NaiveDateTime) -> Result<MasterStore> {
        if self.exists() {
            return Err(Error::Refused(format!(
                "store already exists: {}",
                self.path.display()
            )));
        }
        let store = MasterStore::new(now);
        self.save(&store)?;
        Ok(store)
    }
}

/// Merge one batch file into the store file (all-or-nothing at file level)
pub fn apply_batch_file<P: AsRef<Path>>(
    store: &DocumentStore,
    batch_path: P,
    site: &str,
    category: &str,
    engine: &MergeEngine,
    now: NaiveDateTime,
) -> Result<(MasterStore, MergeSummary)> {
    // Both inputs validated before anything is written
    let batch = Batch::load(batch_path.as_ref(), site, category)?;
    let current = store.load()?;

    info!(
        records = batch.len(),
        contacts = current.len(),
        "loaded batch and master store"
    );

    let (updated, summary) = engine.merge(current, &batch, site, category, now);

    if !summary.already_applied {
        store.save(&updated)?;
    }

    Ok((updated, summary))
}

// ============================================================================
// TESTS
// ============================================================================
