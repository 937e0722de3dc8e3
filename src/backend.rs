//! Wires the sled-backed stores into the services a client uses.
use crate::blob::SledObjectStore;
use crate::book::{Book, Catalog};
use crate::config::Config;
use crate::error::Result;
use crate::identity::Identity;
use crate::notification::Notification;
use crate::rating::{Rating, RatingGate};
use crate::service::TradeService;
use crate::store::{Collection, SledOfferStore};
use std::sync::Arc;
use tracing::info;

/// One opened database plus a typed handle per collection. Cheap to share:
/// every service built from it talks to the same trees.
pub struct Backend {
    db: Arc<sled::Db>,
    config: Config,
    offers: Arc<SledOfferStore>,
    books: Collection<Book>,
    notifications: Collection<Notification>,
    ratings: Collection<Rating>,
    blobs: Arc<SledObjectStore>,
}

impl Backend {
    pub fn open(config: Config) -> Result<Self> {
        let db = if config.temporary {
            sled::Config::new().temporary(true).open()?
        } else {
            sled::Config::new().path(&config.db_path).open()?
        };
        info!(
            path = %config.db_path.display(),
            temporary = config.temporary,
            "database opened"
        );
        Self::with_db(Arc::new(db), config)
    }

    /// In-memory database that disappears on drop.
    pub fn temporary() -> Result<Self> {
        Self::open(Config {
            temporary: true,
            ..Config::default()
        })
    }

    /// Builds on an already opened database, so several clients can share it.
    pub fn with_db(db: Arc<sled::Db>, config: Config) -> Result<Self> {
        let offers = SledOfferStore::new(Collection::open(&db)?, config.watch_poll_interval);
        Ok(Self {
            offers: Arc::new(offers),
            books: Collection::open(&db)?,
            notifications: Collection::open(&db)?,
            ratings: Collection::open(&db)?,
            blobs: Arc::new(SledObjectStore::open(&db)?),
            db,
            config,
        })
    }

    pub fn trade_service(&self, identity: Arc<dyn Identity>) -> TradeService {
        TradeService::new(
            self.offers.clone(),
            Arc::new(self.books.clone()),
            Arc::new(self.notifications.clone()),
            identity,
        )
        .configure(&self.config)
    }

    pub fn rating_gate(&self, identity: Arc<dyn Identity>) -> RatingGate {
        RatingGate::new(self.offers.clone(), self.ratings.clone(), identity)
    }

    pub fn catalog(&self, identity: Arc<dyn Identity>) -> Catalog {
        Catalog::new(self.books.clone(), self.blobs.clone(), identity)
    }

    pub fn db(&self) -> &Arc<sled::Db> {
        &self.db
    }
    pub fn config(&self) -> &Config {
        &self.config
    }
    pub fn offers(&self) -> &Arc<SledOfferStore> {
        &self.offers
    }
    pub fn books(&self) -> &Collection<Book> {
        &self.books
    }
    pub fn notifications(&self) -> &Collection<Notification> {
        &self.notifications
    }
    pub fn ratings(&self) -> &Collection<Rating> {
        &self.ratings
    }
    pub fn blobs(&self) -> &Arc<SledObjectStore> {
        &self.blobs
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}
