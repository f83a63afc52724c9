use crate::error::PersistenceError;
use crate::model::SightingRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sightings (
        id              INTEGER PRIMARY KEY,
        fingerprint     TEXT NOT NULL UNIQUE,
        rare            BOOLEAN NOT NULL,
        common_name     TEXT NOT NULL CHECK (length(common_name) > 0),
        scientific_name TEXT NOT NULL CHECK (length(scientific_name) > 0),
        date_reported   TEXT NOT NULL,
        reported_by     TEXT NOT NULL,
        location_name   TEXT NOT NULL,
        lat             REAL NOT NULL CHECK (lat BETWEEN -90 AND 90),
        lng             REAL NOT NULL CHECK (lng BETWEEN -180 AND 180),
        map_link        TEXT NOT NULL,
        checklist_link  TEXT NOT NULL,
        ingested_at     TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (common_name, scientific_name, date_reported, reported_by, location_name)
    );
    CREATE INDEX IF NOT EXISTS idx_sightings_date ON sightings(date_reported);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

pub trait SightingSink: Send + Sync {
    fn insert(&self, record: &SightingRecord) -> Result<InsertOutcome, PersistenceError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA).context("failed to initialise schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    pub fn query_all(&self) -> Result<Vec<SightingRecord>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT rare, common_name, scientific_name, date_reported, reported_by,
                    location_name, lat, lng, map_link, checklist_link
             FROM sightings
             ORDER BY date_reported, id",
        )?;
        let records = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<usize, PersistenceError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SightingSink for SqliteStore {
    fn insert(&self, record: &SightingRecord) -> Result<InsertOutcome, PersistenceError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO sightings (
                fingerprint, rare, common_name, scientific_name, date_reported,
                reported_by, location_name, lat, lng, map_link, checklist_link
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.fingerprint(),
                record.rare,
                record.common_name,
                record.scientific_name,
                format_date(record.date_reported),
                record.reported_by,
                record.location_name,
                record.lat,
                record.lng,
                record.map_link,
                record.checklist_link,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Fixed-width UTC so text order equals time order.
fn format_date(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<SightingRecord> {
    let date_text: String = row.get(3)?;
    let date_reported = DateTime::parse_from_rfc3339(&date_text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?
        .with_timezone(&Utc);

    Ok(SightingRecord {
        rare: row.get(0)?,
        common_name: row.get(1)?,
        scientific_name: row.get(2)?,
        date_reported,
        reported_by: row.get(4)?,
        location_name: row.get(5)?,
        lat: row.get(6)?,
        lng: row.get(7)?,
        map_link: row.get(8)?,
        checklist_link: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(reporter: &str, hour: u32) -> SightingRecord {
        SightingRecord {
            rare: false,
            common_name: "Wood Duck".into(),
            scientific_name: "Aix sponsa".into(),
            date_reported: Utc.with_ymd_and_hms(2023, 1, 15, hour, 42, 0).unwrap(),
            reported_by: reporter.into(),
            location_name: "Lake Park".into(),
            lat: 30.123,
            lng: -81.456,
            map_link: "http://maps.google.com/?q=30.123,-81.456&ll=30.123,-81.456".into(),
            checklist_link: "https://ebird.org/checklist/S1".into(),
        }
    }

    #[test]
    fn insert_then_duplicate() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        assert_eq!(store.insert(&record("Jane", 7))?, InsertOutcome::Inserted);
        assert_eq!(store.insert(&record("Jane", 7))?, InsertOutcome::Duplicate);
        assert_eq!(store.count()?, 1);
        Ok(())
    }

    #[test]
    fn non_key_changes_are_still_duplicates() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.insert(&record("Jane", 7))?;
        let mut changed = record("Jane", 7);
        changed.rare = true;
        changed.checklist_link = "https://ebird.org/checklist/S2".into();
        assert_eq!(store.insert(&changed)?, InsertOutcome::Duplicate);
        Ok(())
    }

    #[test]
    fn keys_sharing_a_joined_form_are_both_stored() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let mut first = record("Jane", 7);
        first.common_name = "Duck|Wood".into();
        first.scientific_name = "Aix".into();
        let mut second = record("Jane", 7);
        second.common_name = "Duck".into();
        second.scientific_name = "Wood|Aix".into();

        assert_eq!(store.insert(&first)?, InsertOutcome::Inserted);
        assert_eq!(store.insert(&second)?, InsertOutcome::Inserted);
        assert_eq!(store.count()?, 2);
        Ok(())
    }

    #[test]
    fn check_violation_is_an_error() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let mut bad = record("Jane", 7);
        bad.lat = 120.0;
        assert!(matches!(store.insert(&bad), Err(PersistenceError::Sqlite(_))));
        Ok(())
    }

    #[test]
    fn query_all_orders_by_report_time() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.insert(&record("Late", 9))?;
        store.insert(&record("Early", 6))?;

        let all = store.query_all()?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reported_by, "Early");
        assert_eq!(all[1], record("Late", 9));
        Ok(())
    }

    #[test]
    fn reopening_keeps_rows() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested/sightings.sqlite");
        SqliteStore::open(&path)?.insert(&record("Jane", 7))?;

        let reopened = SqliteStore::open(&path)?;
        assert_eq!(reopened.count()?, 1);
        assert_eq!(reopened.insert(&record("Jane", 7))?, InsertOutcome::Duplicate);
        Ok(())
    }
}
