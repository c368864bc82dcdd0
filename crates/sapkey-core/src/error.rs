use sapkey_parser::ParserError;
use thiserror::Error;

use crate::sink::SinkError;

/// Coarse classification of a [`SapelliError`], used at the boundary to pick
/// a user-facing message and cleanup strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The surrounding deployment is missing required setup. Always fatal.
    Configuration,
    /// The uploaded artifact is not a valid project definition or CSV.
    MalformedInput,
    /// The input conflicts with the stored schema (missing location field,
    /// unresolvable enumerated value, missing column).
    SchemaViolation,
    /// CSV header identity conflicts with the resolved project or form.
    IdentityMismatch,
    /// An already-registered project has the same natural identity.
    DuplicateProject,
}

#[derive(Debug, Error)]
pub enum SapelliError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid project definition: {0}")]
    Parse(#[from] ParserError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage sink failure: {0}")]
    Sink(#[from] SinkError),

    #[error("form '{form}' has no location field; every importable form must be geolocatable")]
    FormWithoutLocation { form: String },

    #[error("CSV file is missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("line {line}: column '{column}' value '{value}' is not a number")]
    InvalidNumber {
        line: u64,
        column: String,
        value: String,
    },

    #[error("line {line}: value '{value}' does not match any item of field '{field}'")]
    UnknownLookupValue {
        line: u64,
        field: String,
        value: String,
    },

    #[error("CSV header carries no form identification; please select a form explicitly")]
    NoFormIdentification,

    #[error("CSV header model id {header} does not match project model id {project}; the data was exported from a different project or version")]
    ModelIdMismatch { header: i64, project: i64 },

    #[error("CSV header schema number {schema_number} does not match any form of project '{project}'")]
    UnknownSchemaNumber { schema_number: i64, project: String },

    #[error("selected form (category {selected}) conflicts with the form identified by the CSV header (category {header})")]
    FormSelectionConflict { selected: i64, header: i64 },

    #[error("no form with category {category} exists in project '{project}'")]
    UnknownForm { category: i64, project: String },

    #[error("an accessible project with Sapelli id {sapelli_id} and fingerprint {fingerprint} is already registered")]
    DuplicateProject { sapelli_id: i64, fingerprint: i64 },
}

impl SapelliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SapelliError::Configuration(_) | SapelliError::Io(_) | SapelliError::Sink(_) => {
                ErrorKind::Configuration
            }
            SapelliError::Parse(_) | SapelliError::Csv(_) | SapelliError::InvalidNumber { .. } => {
                ErrorKind::MalformedInput
            }
            SapelliError::FormWithoutLocation { .. }
            | SapelliError::MissingColumn { .. }
            | SapelliError::UnknownLookupValue { .. }
            | SapelliError::NoFormIdentification => ErrorKind::SchemaViolation,
            SapelliError::ModelIdMismatch { .. }
            | SapelliError::UnknownSchemaNumber { .. }
            | SapelliError::FormSelectionConflict { .. }
            | SapelliError::UnknownForm { .. } => ErrorKind::IdentityMismatch,
            SapelliError::DuplicateProject { .. } => ErrorKind::DuplicateProject,
        }
    }
}
