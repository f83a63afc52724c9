use crate::mail::MemorySource;
use crate::pipeline::{IngestOptions, run_ingest};
use crate::store::SqliteStore;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::PathBuf;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub input_dir: PathBuf,
    pub store_path: PathBuf,
    pub ingest: IngestOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub digests: usize,
    pub first_run_records: usize,
    pub first_run_inserted: usize,
    pub first_run_failed: usize,
    pub second_run_inserted: usize,
    pub second_run_duplicates: usize,
    pub total_records: usize,
}

impl HarnessReport {
    pub fn is_idempotent(&self) -> bool {
        self.second_run_inserted == 0 && self.total_records == self.first_run_inserted
    }
}

pub fn run_harness(options: &HarnessOptions) -> Result<HarnessReport> {
    if options.store_path.exists() {
        std::fs::remove_file(&options.store_path).with_context(|| {
            format!("failed to remove old store {}", options.store_path.display())
        })?;
    }

    let mail = MemorySource::new();
    let mut digests = 0usize;
    for entry in WalkDir::new(&options.input_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let body = std::fs::read(entry.path())
            .with_context(|| format!("failed to read digest {}", entry.path().display()))?;
        let id = entry
            .path()
            .strip_prefix(&options.input_dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        mail.push(id, String::from_utf8_lossy(&body))?;
        digests += 1;
    }
    if digests == 0 {
        bail!("no digest files found in {}", options.input_dir.display());
    }

    let store = SqliteStore::open(&options.store_path)?;
    let first = run_ingest(&mail, &store, &options.ingest)?;
    mail.reset_unread()?;
    let second = run_ingest(&mail, &store, &options.ingest)?;

    Ok(HarnessReport {
        digests,
        first_run_records: first.records_parsed,
        first_run_inserted: first.inserted,
        first_run_failed: first.failed,
        second_run_inserted: second.inserted,
        second_run_duplicates: second.duplicates,
        total_records: store.count()?,
    })
}
