use crate::config::LoadedConfig;
use crate::error::PersistenceError;
use crate::mail::{MailSource, build_mail_source};
use crate::model::{MessageOutcome, MessageStatus, RunReport};
use crate::parser::{ParseOptions, classify, parse_digest};
use crate::store::{InsertOutcome, SightingSink, SqliteStore};
use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub workers: usize,
    pub parse: ParseOptions,
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn from_config(loaded: &LoadedConfig) -> Result<Self> {
        let pipeline = &loaded.config.pipeline;
        Ok(Self {
            workers: pipeline.workers,
            parse: ParseOptions {
                timezone: pipeline.timezone()?,
            },
            dry_run: pipeline.dry_run,
        })
    }
}

pub fn ingest_from_config(loaded: &LoadedConfig, dry_run: bool) -> Result<RunReport> {
    let mut options = IngestOptions::from_config(loaded)?;
    options.dry_run |= dry_run;

    let mail = build_mail_source(loaded)?;
    let store_path = loaded.resolve(&loaded.config.store.path)?;
    let store = SqliteStore::open(&store_path)?;
    info!(
        mail = mail.name(),
        store = %store_path.display(),
        workers = options.workers,
        dry_run = options.dry_run,
        "ingest start"
    );

    run_ingest(mail.as_ref(), &store, &options)
}

/// Per-message failures land in the report; only listing the mailbox can fail.
pub fn run_ingest(
    mail: &dyn MailSource,
    sink: &dyn SightingSink,
    options: &IngestOptions,
) -> Result<RunReport> {
    let ids = mail.list_unread().context("failed to list unread messages")?;
    if ids.is_empty() {
        info!("no unread messages");
        return Ok(RunReport::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()
        .context("failed to build worker pool")?;

    let outcomes: Vec<MessageOutcome> = pool.install(|| {
        ids.par_iter()
            .map(|id| process_message(mail, sink, id, options))
            .collect()
    });

    let report = RunReport::from_outcomes(outcomes);
    info!(
        messages = report.messages,
        succeeded = report.succeeded,
        failed = report.failed,
        irrelevant = report.irrelevant,
        parsed = report.records_parsed,
        dropped = report.blocks_dropped,
        inserted = report.inserted,
        duplicates = report.duplicates,
        "ingest summary"
    );
    Ok(report)
}

pub fn process_message(
    mail: &dyn MailSource,
    sink: &dyn SightingSink,
    id: &str,
    options: &IngestOptions,
) -> MessageOutcome {
    let mut outcome = MessageOutcome::new(id);
    if let Err(err) = ingest_message(mail, sink, id, options, &mut outcome) {
        let error = format!("{err:#}");
        warn!(message = %id, error = %error, "message left unread");
        outcome.status = MessageStatus::Failed;
        outcome.error = Some(error);
    }
    outcome
}

fn ingest_message(
    mail: &dyn MailSource,
    sink: &dyn SightingSink,
    id: &str,
    options: &IngestOptions,
    outcome: &mut MessageOutcome,
) -> Result<()> {
    let digest = mail.fetch(id)?;
    if !digest.is_unread {
        debug!(message = %id, "message already read; skipping");
        outcome.status = MessageStatus::Skipped;
        return Ok(());
    }

    let kind = classify(&digest.body_text);
    outcome.kind = Some(kind);
    if !kind.is_relevant() {
        debug!(message = %id, "not a sighting digest");
        outcome.status = MessageStatus::Irrelevant;
        return Ok(());
    }

    let parsed = parse_digest(&digest.body_text, kind, &options.parse)?;
    outcome.records_parsed = parsed.records.len();
    outcome.blocks_dropped = parsed.blocks_dropped;
    info!(
        message = %id,
        kind = ?kind,
        blocks = parsed.blocks_seen,
        records = parsed.records.len(),
        dropped = parsed.blocks_dropped,
        "digest parsed"
    );

    if options.dry_run {
        outcome.status = MessageStatus::DryRun;
        return Ok(());
    }

    let mut first_error: Option<PersistenceError> = None;
    for record in &parsed.records {
        match sink.insert(record) {
            Ok(InsertOutcome::Inserted) => outcome.inserted += 1,
            Ok(InsertOutcome::Duplicate) => {
                debug!(message = %id, fingerprint = %record.fingerprint(), "already ingested");
                outcome.duplicates += 1;
            }
            Err(err) => {
                warn!(
                    message = %id,
                    fingerprint = %record.fingerprint(),
                    error = %err,
                    "insert failed"
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err).context("persistence incomplete");
    }

    mail.mark_read(id)
        .with_context(|| format!("records stored but marking {id} read failed"))?;
    outcome.status = MessageStatus::Ingested;
    Ok(())
}
