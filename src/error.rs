use crate::types::{BookId, BookStatus, UserId};

/// Reasons an offer draft or a rating is refused before anything is written.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Offer must name both the offered and the requested book")]
    MissingBook,
    #[error("Offered book and requested book must differ")]
    SameBook,
    #[error("Offerer and receiver must be different users")]
    SameParty,
    #[error("Offered book {0} is not owned by the offerer")]
    NotBookOwner(BookId),
    #[error("Book {book_id} is {status}, not available")]
    BookUnavailable { book_id: BookId, status: BookStatus },
    #[error("Book {0} is not listed for trade")]
    NotForTrade(BookId),
    #[error("Requested book {0} belongs to the offerer")]
    OwnBookRequested(BookId),
    #[error("Rating score {0} is outside 1..=5")]
    ScoreOutOfRange(u8),
    #[error("Rating comment is empty")]
    EmptyComment,
}

/// Coarse classification used by callers to pick a user-facing reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The offer or book is gone: "item no longer exists".
    NotFound,
    /// A guard was not met; nothing was written.
    PreconditionFailed,
    /// Transient backend failure, offer a retry.
    StoreUnavailable,
    /// Transient backend timeout, offer a retry.
    Timeout,
    /// Corrupt data or bad configuration.
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum TradeError {
    #[error("{entity} {id} no longer exists")]
    NotFound { entity: &'static str, id: String },
    #[error("{action} rejected: {reason}")]
    PreconditionFailed { action: &'static str, reason: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("No user is signed in")]
    NotSignedIn,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Store call timed out during {0}")]
    Timeout(String),
    #[error("Failed to encode or decode record: {0}")]
    Codec(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TradeError>;

impl TradeError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
    pub fn precondition(action: &'static str, reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            action,
            reason: reason.into(),
        }
    }
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PreconditionFailed { .. } | Self::Invalid(_) | Self::NotSignedIn => {
                ErrorKind::PreconditionFailed
            }
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Codec(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
    /// Transient failures get a retry affordance; the core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::StoreUnavailable | ErrorKind::Timeout)
    }
}

impl From<sled::Error> for TradeError {
    fn from(value: sled::Error) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}

impl From<minicbor::decode::Error> for TradeError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for TradeError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        Self::Codec(value.to_string())
    }
}

/// Which best-effort step of a completion did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    BookSold(BookId),
    Notification(UserId),
}

/// A side effect that failed after the completed status was already committed.
/// Reported and logged, never surfaced as a failure of the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectFailure {
    pub effect: SideEffect,
    pub reason: String,
}

impl std::fmt::Display for SideEffectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.effect {
            SideEffect::BookSold(book) => write!(f, "marking book {book} sold: {}", self.reason),
            SideEffect::Notification(user) => {
                write!(f, "notifying user {user}: {}", self.reason)
            }
        }
    }
}
