use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed digest: marker {marker:?} not found")]
    MalformedDigest { marker: &'static str },

    #[error("field extraction failed for {field}: {reason}")]
    FieldExtraction { field: &'static str, reason: String },

    #[error("cannot disambiguate species name {line:?}: {reason}")]
    NameDisambiguation { line: String, reason: String },

    #[error("cannot parse coordinates from {input:?}: {reason}")]
    CoordinateParse { input: String, reason: String },

    #[error("cannot parse report date {input:?}")]
    DateParse { input: String },
}

impl ParseError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        ParseError::FieldExtraction {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}
