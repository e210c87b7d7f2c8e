use rusqlite::ErrorCode;
use thiserror::Error;

/// Why a thread no longer accepts replies or awards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoidReason {
    /// The listing was awarded to another organization.
    ReservedElsewhere,
    /// The listing's validity window elapsed before any award.
    Expired,
}

impl std::fmt::Display for VoidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedElsewhere => f.write_str("listing awarded elsewhere"),
            Self::Expired => f.write_str("listing expired"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Organization {org_id} is not a participant of thread {thread_id}")]
    NotParticipant { thread_id: String, org_id: String },

    #[error("Organization {0} cannot contact its own listing")]
    SelfContact(String),

    #[error("Thread already exists for listing {listing_id} and organization {org_id}")]
    DuplicateThread { listing_id: String, org_id: String },

    #[error("Thread {thread_id} is void: {reason}")]
    ThreadVoid { thread_id: String, reason: VoidReason },

    #[error("Listing already reserved: {0}")]
    AlreadyReserved(String),

    #[error("Listing expired: {0}")]
    ListingExpired(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notification error: {0}")]
    Notification(String),

    /// Datastore busy or locked past the request timeout. Safe to retry.
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    /// Business-logic storage errors (constraint mismatch, corrupt rows, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParse(#[from] chrono::ParseError),
}

impl ExchangeError {
    /// Wraps a rusqlite error with context, keeping busy/locked failures retryable.
    pub fn storage(context: &str, e: rusqlite::Error) -> Self {
        if is_busy(&e) {
            Self::Unavailable(format!("{}: {}", context, e))
        } else {
            Self::Storage(format!("{}: {}", context, e))
        }
    }

    /// Only infrastructure failures are worth a caller-driven retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Expected marketplace outcomes, shown as notices rather than errors.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Self::AlreadyReserved(_) | Self::ThreadVoid { .. } | Self::ListingExpired(_)
        )
    }
}

impl From<rusqlite::Error> for ExchangeError {
    fn from(e: rusqlite::Error) -> Self {
        if is_busy(&e) {
            Self::Unavailable(e.to_string())
        } else {
            Self::Database(e)
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::DatabaseBusy || f.code == ErrorCode::DatabaseLocked
    )
}

/// True when the error is a UNIQUE/PRIMARY KEY violation.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
