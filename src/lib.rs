//! Trade offer negotiation for a peer-to-peer book exchange.
//!
//! Two users move an offer through `pending -> accepted -> completed` (or
//! `pending -> rejected`) over a shared document store with no multi-record
//! transactions. See [`service::TradeService`] for the actions.

pub mod backend;
pub mod blob;
pub mod book;
pub mod config;
pub mod error;
pub mod identity;
pub mod notification;
pub mod observe;
pub mod offer;
pub mod rating;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use backend::Backend;
pub use config::Config;
pub use error::{ErrorKind, Result, TradeError, ValidationError};
pub use offer::{OfferDraft, TradeOffer};
pub use service::{Completion, ConfirmOutcome, TradeService};
pub use types::{BookId, OfferId, OfferStatus, UserId};
