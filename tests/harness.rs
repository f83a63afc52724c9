use anyhow::Result;
use chrono::{TimeZone, Utc};
use rarebird::config::load_config;
use rarebird::harness::{HarnessOptions, run_harness};
use rarebird::model::MessageStatus;
use rarebird::parser::ParseOptions;
use rarebird::pipeline::{IngestOptions, ingest_from_config};
use rarebird::store::SqliteStore;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const MAP_A: &str = "http://maps.google.com/?ie=UTF8&t=p&z=13&q=30.123,-81.456&ll=30.123,-81.456";
const MAP_B: &str = "http://maps.google.com/?ie=UTF8&t=p&z=13&q=25.761,-80.191&ll=25.761,-80.191";

#[test]
fn directory_ingest_moves_processed_digests() -> Result<()> {
    let env = setup_fixture_env()?;

    let loaded = load_config(&env.config_path)?;
    let report = ingest_from_config(&loaded, false)?;

    assert_eq!(report.messages, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.irrelevant, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.records_parsed, 3);
    assert_eq!(report.blocks_dropped, 1);
    assert_eq!(report.inserted, 3);

    assert!(env.inbox.join("read/001-needs.txt").exists());
    assert!(env.inbox.join("read/002-rare.txt").exists());
    assert!(env.inbox.join("003-newsletter.txt").exists());

    let store = SqliteStore::open(&env.store_path)?;
    let records = store.query_all()?;
    assert_eq!(records.len(), 3);

    let muscovy = records
        .iter()
        .find(|record| record.scientific_name == "Cairina moschata")
        .expect("muscovy record must exist");
    assert!(muscovy.rare);
    assert_eq!(muscovy.common_name, "Muscovy Duck (Exotic: Naturalized)");
    assert_eq!((muscovy.lat, muscovy.lng), (25.761, -80.191));

    let wood_duck = records
        .iter()
        .find(|record| record.common_name == "Wood Duck")
        .expect("wood duck record must exist");
    assert!(!wood_duck.rare);
    // Jan 15 07:42 in New York is 12:42 UTC.
    assert_eq!(
        wood_duck.date_reported,
        Utc.with_ymd_and_hms(2023, 1, 15, 12, 42, 0).unwrap()
    );

    Ok(())
}

#[test]
fn second_ingest_only_sees_untouched_messages() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;

    ingest_from_config(&loaded, false)?;
    let report = ingest_from_config(&loaded, false)?;

    assert_eq!(report.messages, 1);
    assert_eq!(report.outcomes[0].status, MessageStatus::Irrelevant);
    assert_eq!(report.inserted, 0);
    assert_eq!(SqliteStore::open(&env.store_path)?.count()?, 3);
    Ok(())
}

#[test]
fn dry_run_leaves_inbox_and_store_untouched() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;

    let report = ingest_from_config(&loaded, true)?;

    assert_eq!(report.records_parsed, 3);
    assert_eq!(report.inserted, 0);
    assert!(env.inbox.join("001-needs.txt").exists());
    assert!(!env.inbox.join("read").exists());
    assert_eq!(SqliteStore::open(&env.store_path)?.count()?, 0);
    Ok(())
}

#[test]
fn harness_reports_idempotent_reingest() -> Result<()> {
    let env = setup_fixture_env()?;

    let report = run_harness(&HarnessOptions {
        input_dir: env.inbox.clone(),
        store_path: env.root.join("harness.sqlite"),
        ingest: IngestOptions {
            workers: 2,
            parse: ParseOptions {
                timezone: chrono_tz::America::New_York,
            },
            dry_run: false,
        },
    })?;

    assert_eq!(report.digests, 3);
    assert_eq!(report.first_run_records, 3);
    assert_eq!(report.first_run_inserted, 3);
    assert_eq!(report.first_run_failed, 0);
    assert_eq!(report.second_run_inserted, 0);
    assert_eq!(report.second_run_duplicates, 3);
    assert_eq!(report.total_records, 3);
    assert!(report.is_idempotent());

    Ok(())
}

#[test]
fn harness_starts_from_an_empty_scratch_store() -> Result<()> {
    let env = setup_fixture_env()?;
    let options = HarnessOptions {
        input_dir: env.inbox.clone(),
        store_path: env.root.join("scratch/harness.sqlite"),
        ingest: IngestOptions {
            workers: 2,
            parse: ParseOptions::default(),
            dry_run: false,
        },
    };

    let first = run_harness(&options)?;
    let second = run_harness(&options)?;

    assert_eq!(first.first_run_inserted, 3);
    assert_eq!(second.first_run_inserted, 3);
    assert_eq!(second.total_records, 3);
    assert!(!env.store_path.exists());
    Ok(())
}

#[test]
fn harness_rejects_empty_input() -> Result<()> {
    let temp = tempdir()?;
    let empty = temp.path().join("empty");
    fs::create_dir_all(&empty)?;

    let result = run_harness(&HarnessOptions {
        input_dir: empty,
        store_path: temp.path().join("harness.sqlite"),
        ingest: IngestOptions {
            workers: 1,
            parse: ParseOptions::default(),
            dry_run: false,
        },
    });
    assert!(result.is_err());
    Ok(())
}

#[test]
fn missing_config_falls_back_to_defaults() -> Result<()> {
    let temp = tempdir()?;
    let loaded = load_config(&temp.path().join("absent.toml"))?;

    assert_eq!(loaded.config.pipeline.workers, 4);
    assert_eq!(
        loaded.resolve(&loaded.config.store.path)?,
        temp.path().join("data/sightings.sqlite")
    );
    Ok(())
}

struct FixtureEnv {
    root: PathBuf,
    config_path: PathBuf,
    inbox: PathBuf,
    store_path: PathBuf,
}

fn setup_fixture_env() -> Result<FixtureEnv> {
    let temp = tempdir()?;
    let root = temp.keep();

    let inbox = root.join("inbox");
    fs::create_dir_all(&inbox)?;
    write_digests(&inbox)?;

    let config_path = root.join("rarebird.toml");
    fs::write(
        &config_path,
        r#"
[mail]
mode = "directory"
inbox_dir = "inbox"

[store]
path = "data/sightings.sqlite"

[pipeline]
workers = 2
timezone = "America/New_York"
"#,
    )?;

    Ok(FixtureEnv {
        store_path: root.join("data/sightings.sqlite"),
        root,
        config_path,
        inbox,
    })
}

fn write_digests(inbox: &Path) -> Result<()> {
    let needs = digest(
        "eBird Needs Alert for Southern Florida",
        &[
            sighting(
                "Wood Duck (Aix sponsa) (1)",
                "Jan 15, 2023 07:42",
                "Jane Doe",
                "Lake Park, Duval, Florida, US",
                MAP_A,
                "S100",
            ),
            sighting(
                "Mottled Duck (Anas fulvigula) (A. f. maculosa) (2)",
                "Jan 15, 2023 08:10",
                "John Roe",
                "Lake Park, Duval, Florida, US",
                MAP_A,
                "S101",
            ),
            // No map line: dropped, the rest of the digest still lands.
            "Limpkin (Aramus guarauna)\r\n- Reported Jan 15, 2023 09:00 by Jane Doe\r\n- Lake Park\r\n- Checklist: https://ebird.org/checklist/S102".to_string(),
        ],
    );
    let rare = digest(
        "eBird Southern Rare Bird Alert for Florida",
        &[sighting(
            "Muscovy Duck (Domestic type) (Cairina moschata) (Exotic: Naturalized) (X)",
            "Jan 16, 2023 10:05",
            "Ana Lee",
            "Coral Gables, Miami-Dade, Florida, US",
            MAP_B,
            "S200",
        )],
    );

    fs::write(inbox.join("001-needs.txt"), needs)?;
    fs::write(inbox.join("002-rare.txt"), rare)?;
    fs::write(
        inbox.join("003-newsletter.txt"),
        "Your monthly birding newsletter\r\n\r\nNothing to report.\r\n",
    )?;
    Ok(())
}

fn sighting(
    name: &str,
    reported: &str,
    reporter: &str,
    location: &str,
    map: &str,
    checklist: &str,
) -> String {
    [
        name.to_string(),
        format!("- Reported {reported} by {reporter}"),
        format!("- {location}"),
        format!("- Map: {map}"),
        format!("- Checklist: https://ebird.org/checklist/{checklist}"),
    ]
    .join("\r\n")
}

fn digest(title: &str, blocks: &[String]) -> String {
    format!(
        "{title}\r\n\r\nvisit: https://ebird.org/news/please-bird-mindfully\r\n\r\n{}\r\n\r\n***\r\n\r\nYou are receiving this because you subscribed.\r\n",
        blocks.join("\r\n\r\n")
    )
}
