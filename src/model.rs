use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct RawDigest {
    pub id: String,
    pub body_text: String,
    pub is_unread: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DigestKind {
    NeedsAlert,
    RareAlert,
    Irrelevant,
}

impl DigestKind {
    pub fn is_rare(self) -> bool {
        matches!(self, DigestKind::RareAlert)
    }

    pub fn is_relevant(self) -> bool {
        !matches!(self, DigestKind::Irrelevant)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SightingRecord {
    pub rare: bool,
    pub common_name: String,
    pub scientific_name: String,
    pub date_reported: DateTime<Utc>,
    pub reported_by: String,
    pub location_name: String,
    pub lat: f64,
    pub lng: f64,
    pub map_link: String,
    pub checklist_link: String,
}

impl SightingRecord {
    /// SHA-256 over the length-prefixed natural key fields.
    pub fn fingerprint(&self) -> String {
        let date = self.date_reported.to_rfc3339();
        let mut hasher = Sha256::new();
        for field in [
            self.common_name.as_str(),
            self.scientific_name.as_str(),
            date.as_str(),
            self.reported_by.as_str(),
            self.location_name.as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDigest {
    pub records: Vec<SightingRecord>,
    pub blocks_seen: usize,
    pub blocks_dropped: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Ingested,
    DryRun,
    Irrelevant,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageOutcome {
    pub message_id: String,
    pub status: MessageStatus,
    pub kind: Option<DigestKind>,
    pub records_parsed: usize,
    pub blocks_dropped: usize,
    pub inserted: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageOutcome {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: MessageStatus::Failed,
            kind: None,
            records_parsed: 0,
            blocks_dropped: 0,
            inserted: 0,
            duplicates: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub messages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub irrelevant: usize,
    pub skipped: usize,
    pub records_parsed: usize,
    pub blocks_dropped: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub outcomes: Vec<MessageOutcome>,
}

impl RunReport {
    pub fn from_outcomes(outcomes: Vec<MessageOutcome>) -> Self {
        let mut report = RunReport {
            messages: outcomes.len(),
            ..RunReport::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                MessageStatus::Ingested | MessageStatus::DryRun => report.succeeded += 1,
                MessageStatus::Irrelevant => report.irrelevant += 1,
                MessageStatus::Skipped => report.skipped += 1,
                MessageStatus::Failed => report.failed += 1,
            }
            report.records_parsed += outcome.records_parsed;
            report.blocks_dropped += outcome.blocks_dropped;
            report.inserted += outcome.inserted;
            report.duplicates += outcome.duplicates;
        }
        report.outcomes = outcomes;
        report
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0
    }
}
