//! Client configuration, loaded from environment variables.
use crate::error::{Result, TradeError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_COMPLETION_MESSAGE: &str =
    "The trade was completed successfully. Both parties confirmed the exchange of books.";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Where the sled database lives
    pub db_path: PathBuf,
    /// Open the database in temporary mode (removed on drop)
    pub temporary: bool,
    /// How many completed offers the sent/received listings keep, newest first
    pub completed_offers_to_show: usize,
    /// Upper bound on how long cancelling a live subscription takes
    pub watch_poll_interval: Duration,
    /// Text of the notification both parties get when a trade completes
    pub completion_message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("book_exchange.db"),
            temporary: false,
            completed_offers_to_show: 5,
            watch_poll_interval: Duration::from_millis(250),
            completion_message: DEFAULT_COMPLETION_MESSAGE.to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_path: lookup("BOOK_EXCHANGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            temporary: parse(&lookup, "BOOK_EXCHANGE_TEMPORARY")?.unwrap_or(defaults.temporary),
            completed_offers_to_show: parse(&lookup, "BOOK_EXCHANGE_COMPLETED_TO_SHOW")?
                .unwrap_or(defaults.completed_offers_to_show),
            watch_poll_interval: parse(&lookup, "BOOK_EXCHANGE_WATCH_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.watch_poll_interval),
            completion_message: lookup("BOOK_EXCHANGE_COMPLETION_MESSAGE")
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(defaults.completion_message),
        })
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TradeError::Config(format!("invalid {key}: {raw:?}"))),
        None => Ok(None),
    }
}
