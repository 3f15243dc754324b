// ⚠️ Error Types
// Input errors abort the run; oracle errors degrade a single record.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems with the input tables. Raised before any record is processed.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed row in {table}: {source}")]
    Malformed {
        table: String,
        #[source]
        source: csv::Error,
    },

    #[error("{table}: missing required column '{column}' (available: {available})")]
    MissingColumn {
        table: String,
        column: String,
        available: String,
    },

    #[error("{table}: no specimen id column found; expected one of: {expected}")]
    MissingIdColumn { table: String, expected: String },

    #[error("no Process IDs in common between the metadata table and the sample list")]
    EmptyJoin,
}

/// Failure of a single backbone lookup.
///
/// Cloneable so a cached failure can be handed to every record that shares
/// the subject name.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unreadable response: {0}")]
    Parse(String),
}
