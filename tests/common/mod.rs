#![allow(dead_code)]

use book_exchange::backend::Backend;
use book_exchange::book::NewBook;
use book_exchange::config::Config;
use book_exchange::identity::Session;
use book_exchange::offer::{OfferDraft, TradeOffer};
use book_exchange::service::TradeService;
use book_exchange::types::{BookId, UserId};
use book_exchange::utils;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A database shared by three signed-in clients.
pub struct World {
    _dir: TempDir,
    pub backend: Backend,
    pub alice_id: UserId,
    pub bob_id: UserId,
    pub carol_id: UserId,
    pub alice: TradeService,
    pub bob: TradeService,
    pub carol: TradeService,
    pub alice_session: Arc<Session>,
    pub bob_session: Arc<Session>,
}

pub fn world() -> anyhow::Result<World> {
    world_with(|_| {})
}

pub fn world_with(tweak: impl FnOnce(&mut Config)) -> anyhow::Result<World> {
    // Sled holds a file lock per database, so every test gets its own directory.
    let dir = tempfile::tempdir()?;
    let mut config = Config {
        db_path: dir.path().join("exchange.db"),
        watch_poll_interval: Duration::from_millis(20),
        ..Config::default()
    };
    tweak(&mut config);
    let backend = Backend::open(config)?;

    let alice_id = UserId::from(utils::new_uuid_to_bech32("user_")?);
    let bob_id = UserId::from(utils::new_uuid_to_bech32("user_")?);
    let carol_id = UserId::from(utils::new_uuid_to_bech32("user_")?);
    let alice_session = Arc::new(Session::signed_in(alice_id.clone()));
    let bob_session = Arc::new(Session::signed_in(bob_id.clone()));
    let carol_session = Arc::new(Session::signed_in(carol_id.clone()));

    Ok(World {
        alice: backend.trade_service(alice_session.clone()),
        bob: backend.trade_service(bob_session.clone()),
        carol: backend.trade_service(carol_session),
        _dir: dir,
        backend,
        alice_id,
        bob_id,
        carol_id,
        alice_session,
        bob_session,
    })
}

impl World {
    /// Lists a tradeable book owned by `owner`.
    pub fn list_book(&self, owner: &UserId, title: &str) -> anyhow::Result<BookId> {
        let catalog = self
            .backend
            .catalog(Arc::new(Session::signed_in(owner.clone())));
        let book = catalog.add_book(NewBook::new(title, "Anon").for_trade(), vec![])?;
        Ok(book.id)
    }

    /// Alice offers a fresh book of hers for a fresh book of Bob's.
    pub fn pending_offer(&self) -> anyhow::Result<TradeOffer> {
        let offered = self.list_book(&self.alice_id, "Dune")?;
        let requested = self.list_book(&self.bob_id, "Emma")?;
        let draft = OfferDraft::new()
            .offer_book(offered)
            .request_book(requested)
            .set_message("swap?");
        Ok(self.alice.create_offer(&draft)?)
    }

    pub fn accepted_offer(&self) -> anyhow::Result<TradeOffer> {
        let offer = self.pending_offer()?;
        Ok(self.bob.accept_offer(&offer.id)?)
    }

    pub fn completed_offer(&self) -> anyhow::Result<TradeOffer> {
        let offer = self.accepted_offer()?;
        self.alice.confirm_trade(&offer.id)?;
        Ok(self.bob.confirm_trade(&offer.id)?.offer)
    }
}
