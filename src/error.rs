use crate::models::TripStatus;
use serde::Serialize;
use thiserror::Error;

/// 服务层错误
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("trip {0} not found")]
    TripNotFound(i64),

    #[error("tag {0} not found")]
    TagNotFound(i64),

    #[error("trip {0} has no tags")]
    NoTags(i64),

    #[error("no receipt photo on trip {0}")]
    NoReceiptPhoto(i64),

    #[error("receipt for trip {0} has already been parsed")]
    ReceiptAlreadyParsed(i64),

    #[error("no receipt items found for trip {0}")]
    NoReceiptItems(i64),

    #[error("no enriched tags found for trip {0}")]
    NoEnrichedTags(i64),

    #[error("trip {trip_id} cannot {action} while {status}")]
    InvalidTransition {
        trip_id: i64,
        status: TripStatus,
        action: &'static str,
    },

    #[error("trip {0} is already finalized")]
    TripFinalized(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("trip {0} has another operation in flight")]
    TripBusy(i64),

    #[error("trip {0} was modified concurrently")]
    ConcurrentModification(i64),

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("oracle response could not be parsed: {0}")]
    OracleParseError(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("storage write of {attempted} rows failed: {reason}")]
    StorageWriteFailed { attempted: usize, reason: String },

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PreconditionNotMet,
    NotFound,
    Conflict,
    OracleUnavailable,
    OracleParseError,
    ExtractionFailed,
    StorageWriteFailed,
    Internal,
}

impl ReconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconError::TripNotFound(_) | ReconError::TagNotFound(_) => ErrorKind::NotFound,
            ReconError::NoTags(_)
            | ReconError::NoReceiptPhoto(_)
            | ReconError::NoReceiptItems(_)
            | ReconError::NoEnrichedTags(_)
            | ReconError::InvalidInput(_) => ErrorKind::PreconditionNotMet,
            ReconError::ReceiptAlreadyParsed(_)
            | ReconError::InvalidTransition { .. }
            | ReconError::TripFinalized(_)
            | ReconError::TripBusy(_)
            | ReconError::ConcurrentModification(_) => ErrorKind::Conflict,
            ReconError::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            ReconError::OracleParseError(_) => ErrorKind::OracleParseError,
            ReconError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            ReconError::StorageWriteFailed { .. } => ErrorKind::StorageWriteFailed,
            ReconError::Storage(_) | ReconError::Config(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
