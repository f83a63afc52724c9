use crate::error::ParseError;
use crate::marker::{after, between, find_from};
use crate::model::{DigestKind, ParsedDigest, SightingRecord};
use crate::species::disambiguate;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

pub const NEEDS_ALERT_MARKER: &str = "Needs Alert for Southern";
pub const RARE_ALERT_MARKER: &str = "Southern Rare Bird Alert";

pub const SECTION_START: &str = "visit: https://ebird.org/news/please-bird-mindfully\r\n\r\n";
pub const SECTION_END: &str = "\r\n\r\n***";
pub const CONTINUATION: &str = "\r\n- ";
pub const BLOCK_SEPARATOR: &str = "\r\n\r\n";

const REPORTED_MARKER: &str = "- Reported ";
const REPORTED_END: &str = " by";
const REPORTER_MARKER: &str = "by ";
const LOCATION_MARKER: &str = "- ";
const MAP_MARKER: &str = "- Map: ";
const CHECKLIST_MARKER: &str = "- Checklist: ";
const COORDS_START: &str = "&q=";
const COORDS_START_FIRST_PARAM: &str = "?q=";
const COORDS_END: &str = "&ll";

/// Joins the continuation lines of one sighting onto its header line.
const SENTINEL: char = '\u{1f}';
const SUB_FIELDS: usize = 5;
const OPTIONAL_TRAILERS: [&str; 2] = ["- Comments:", "- Media:"];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

const DATETIME_FORMATS: [&str; 7] = [
    "%b %d, %Y %H:%M",
    "%B %d, %Y %H:%M",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%b %d, %Y", "%B %d, %Y", "%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub timezone: Tz,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { timezone: Tz::UTC }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SightingBlock<'a> {
    pub name: &'a str,
    pub report: &'a str,
    pub location: &'a str,
    pub map: &'a str,
    pub checklist: &'a str,
}

impl<'a> SightingBlock<'a> {
    pub fn from_flattened(block: &'a str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = block.split(SENTINEL).map(str::trim).collect();
        let extras = fields.get(SUB_FIELDS..).unwrap_or_default();
        let trailers_ok = extras
            .iter()
            .all(|extra| OPTIONAL_TRAILERS.iter().any(|t| extra.starts_with(t)));
        if fields.len() < SUB_FIELDS || !trailers_ok {
            return Err(ParseError::field(
                "block",
                format!("expected {SUB_FIELDS} sub-fields, found {}", fields.len()),
            ));
        }

        Ok(SightingBlock {
            name: fields[0],
            report: fields[1],
            location: fields[2],
            map: fields[3],
            checklist: fields[4],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockFields<'a> {
    pub date_raw: &'a str,
    pub reported_by: &'a str,
    pub location_name: &'a str,
    pub map_link: &'a str,
    pub checklist_link: &'a str,
}

pub fn classify(body: &str) -> DigestKind {
    if body.contains(RARE_ALERT_MARKER) {
        DigestKind::RareAlert
    } else if body.contains(NEEDS_ALERT_MARKER) {
        DigestKind::NeedsAlert
    } else {
        DigestKind::Irrelevant
    }
}

pub fn extract_section(body: &str) -> Result<&str, ParseError> {
    let start = find_from(body, SECTION_START, 0).ok_or(ParseError::MalformedDigest {
        marker: SECTION_START,
    })?;
    let end = find_from(body, SECTION_END, start.end).ok_or(ParseError::MalformedDigest {
        marker: SECTION_END,
    })?;
    Ok(&body[start.end..end.start])
}

pub fn segment(section: &str) -> Vec<String> {
    let flattened = section.replace(CONTINUATION, &format!("{SENTINEL}- "));
    flattened
        .split(BLOCK_SEPARATOR)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn parse_fields<'a>(block: &SightingBlock<'a>) -> Result<BlockFields<'a>, ParseError> {
    let (date_raw, date_end) =
        between(block.report, REPORTED_MARKER, REPORTED_END, "date_reported")?;
    let reporter = find_from(block.report, REPORTER_MARKER, date_end.start)
        .ok_or_else(|| ParseError::field("reported_by", "marker \"by \" not found"))?;
    let reported_by = non_empty(&block.report[reporter.end..], "reported_by")?;

    let location_name = non_empty(
        after(block.location, LOCATION_MARKER, "location_name")?,
        "location_name",
    )?;
    let map_link = absolute_url(after(block.map, MAP_MARKER, "map_link")?, "map_link")?;
    let checklist_link = absolute_url(
        after(block.checklist, CHECKLIST_MARKER, "checklist_link")?,
        "checklist_link",
    )?;

    Ok(BlockFields {
        date_raw: date_raw.trim(),
        reported_by,
        location_name,
        map_link,
        checklist_link,
    })
}

pub fn parse_coordinates(map_link: &str) -> Result<(f64, f64), ParseError> {
    let coordinate_error = |reason: &str| ParseError::CoordinateParse {
        input: map_link.to_string(),
        reason: reason.to_string(),
    };

    let (span, _) = between(map_link, COORDS_START, COORDS_END, "coordinates")
        .or_else(|_| between(map_link, COORDS_START_FIRST_PARAM, COORDS_END, "coordinates"))
        .map_err(|_| coordinate_error("query markers &q= / &ll not found"))?;
    let parts: Vec<&str> = span.split(',').map(str::trim).collect();
    let [lat, lng] = parts.as_slice() else {
        return Err(coordinate_error("expected exactly two components"));
    };
    let lat: f64 = lat.parse().map_err(|_| coordinate_error("latitude is not numeric"))?;
    let lng: f64 = lng.parse().map_err(|_| coordinate_error("longitude is not numeric"))?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(coordinate_error("coordinates out of range"));
    }
    Ok((lat, lng))
}

pub fn parse_report_date(raw: &str, timezone: Tz) -> Result<DateTime<Utc>, ParseError> {
    let cleaned = WHITESPACE.replace_all(raw.trim(), " ");

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ParseError::DateParse {
            input: raw.to_string(),
        })?;

    Ok(localize(naive, timezone))
}

/// Ambiguous times take the earlier instant; times inside a DST gap are
/// moved forward by the usual one-hour shift.
fn localize(naive: NaiveDateTime, timezone: Tz) -> DateTime<Utc> {
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(naive + TimeDelta::hours(1)))
                .earliest()
        })
        .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
}

pub fn parse_block(
    block: &str,
    rare: bool,
    options: &ParseOptions,
) -> Result<SightingRecord, ParseError> {
    let block = SightingBlock::from_flattened(block)?;
    let fields = parse_fields(&block)?;
    let species = disambiguate(block.name)?;
    let (lat, lng) = parse_coordinates(fields.map_link)?;
    let date_reported = parse_report_date(fields.date_raw, options.timezone)?;

    Ok(SightingRecord {
        rare,
        common_name: species.common,
        scientific_name: species.scientific,
        date_reported,
        reported_by: fields.reported_by.to_string(),
        location_name: fields.location_name.to_string(),
        lat,
        lng,
        map_link: fields.map_link.to_string(),
        checklist_link: fields.checklist_link.to_string(),
    })
}

/// Turns one digest body into records. Only a missing section marker fails
/// the whole digest; a bad block is logged and skipped.
pub fn parse_digest(
    body: &str,
    kind: DigestKind,
    options: &ParseOptions,
) -> Result<ParsedDigest, ParseError> {
    let section = extract_section(body)?;
    let blocks = segment(section);
    let mut parsed = ParsedDigest {
        blocks_seen: blocks.len(),
        ..ParsedDigest::default()
    };

    for (index, block) in blocks.iter().enumerate() {
        match parse_block(block, kind.is_rare(), options) {
            Ok(record) => {
                debug!(
                    block = index,
                    species = %record.common_name,
                    reporter = %record.reported_by,
                    "parsed sighting"
                );
                parsed.records.push(record);
            }
            Err(err) => {
                warn!(block = index, error = %err, "dropping sighting block");
                parsed.blocks_dropped += 1;
            }
        }
    }

    Ok(parsed)
}

fn non_empty<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::field(field, "value is empty"));
    }
    Ok(value)
}

fn absolute_url<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ParseError> {
    let value = non_empty(value, field)?;
    Url::parse(value).map_err(|err| ParseError::field(field, format!("invalid url: {err}")))?;
    Ok(value)
}
