//! Races between clients, failing side effects and the live pending feed.
//!
//! Every client shares one sled database, the way several devices share the
//! remote store. Races are driven with scoped threads released by a barrier.
mod common;

use book_exchange::book::{Book, BookRegistry};
use book_exchange::error::{ErrorKind, Result, SideEffect, TradeError};
use book_exchange::identity::Session;
use book_exchange::notification::{Notification, NotificationSink};
use book_exchange::offer::{OfferPatch, PatchOutcome, TradeOffer};
use book_exchange::service::{Completion, TradeService};
use book_exchange::store::{ChangeCallback, DeleteOutcome, OfferStore, Subscription};
use book_exchange::types::{BookId, BookStatus, OfferId, OfferStatus, Party, UserId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn completions(outcomes: &[Completion]) -> usize {
    outcomes
        .iter()
        .filter(|c| matches!(c, Completion::Completed(_)))
        .count()
}

#[test]
fn simultaneous_confirms_complete_exactly_once() -> anyhow::Result<()> {
    for _ in 0..8 {
        let world = common::world()?;
        let offer = world.accepted_offer()?;
        let barrier = Barrier::new(2);

        let outcomes = std::thread::scope(|s| {
            let alice = s.spawn(|| {
                barrier.wait();
                world.alice.confirm_trade(&offer.id)
            });
            let bob = s.spawn(|| {
                barrier.wait();
                world.bob.confirm_trade(&offer.id)
            });
            [alice.join(), bob.join()]
        });

        let mut results = Vec::new();
        for outcome in outcomes {
            let outcome = outcome.map_err(|_| anyhow::anyhow!("client thread panicked"))??;
            results.push(outcome.completion);
        }
        assert_eq!(completions(&results), 1);

        let stored = world.alice.get_offer(&offer.id)?;
        assert_eq!(stored.status, OfferStatus::Completed);
        assert_eq!(world.backend.notifications().for_user(&world.alice_id)?.len(), 1);
        assert_eq!(world.backend.notifications().for_user(&world.bob_id)?.len(), 1);
    }
    Ok(())
}

/// Puts an accepted offer into the state a crash between the second
/// confirmation and the completion write leaves behind.
fn stuck_offer(world: &common::World) -> anyhow::Result<TradeOffer> {
    let offer = world.accepted_offer()?;
    let both = OfferPatch::new()
        .expect_status(OfferStatus::Accepted)
        .set_confirmed(Party::Offerer, true)
        .set_confirmed(Party::Receiver, true);
    let PatchOutcome::Applied(stuck) = world.backend.offers().update(&offer.id, &both)? else {
        anyhow::bail!("setting both confirmations should apply");
    };
    assert!(stuck.awaiting_completion());
    Ok(stuck)
}

#[test]
fn racing_completers_run_side_effects_once() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = stuck_offer(&world)?;
    let barrier = Barrier::new(4);
    let services = [&world.alice, &world.bob, &world.alice, &world.bob];

    let outcomes: Vec<Completion> = std::thread::scope(|s| {
        let handles: Vec<_> = services
            .iter()
            .map(|service| {
                let (barrier, id) = (&barrier, &offer.id);
                s.spawn(move || {
                    barrier.wait();
                    service.complete_if_ready(id)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("completer panicked"))
            .collect::<Result<_>>()
    })?;

    assert_eq!(completions(&outcomes), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|c| **c == Completion::AlreadyCompleted)
            .count(),
        3
    );
    assert_eq!(world.backend.notifications().for_user(&world.bob_id)?.len(), 1);
    Ok(())
}

#[test]
fn reading_a_stuck_offer_completes_it() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = stuck_offer(&world)?;

    let healed = world.bob.get_offer(&offer.id)?;
    assert_eq!(healed.status, OfferStatus::Completed);

    let books = world.backend.books();
    assert_eq!(books.get_book(&offer.offered_book_id)?.status, BookStatus::Sold);
    assert_eq!(books.get_book(&offer.requested_book_id)?.status, BookStatus::Sold);
    assert_eq!(world.backend.notifications().for_user(&world.alice_id)?.len(), 1);
    Ok(())
}

#[test]
fn listings_heal_stuck_offers() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = stuck_offer(&world)?;

    let sent = world.alice.sent_offers()?;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, offer.id);
    assert_eq!(sent[0].status, OfferStatus::Completed);
    Ok(())
}

#[test]
fn accept_and_withdraw_race_leaves_one_winner() -> anyhow::Result<()> {
    for _ in 0..8 {
        let world = common::world()?;
        let offer = world.pending_offer()?;
        let barrier = Barrier::new(2);

        let (accepted, withdrawn) = std::thread::scope(|s| {
            let accept = s.spawn(|| {
                barrier.wait();
                world.bob.accept_offer(&offer.id).is_ok()
            });
            let withdraw = s.spawn(|| {
                barrier.wait();
                world.alice.delete_offer(&offer.id).is_ok()
            });
            (
                accept.join().unwrap_or(false),
                withdraw.join().unwrap_or(false),
            )
        });

        match world.alice.get_offer(&offer.id) {
            Ok(stored) => {
                assert!(accepted && !withdrawn);
                assert_eq!(stored.status, OfferStatus::Accepted);
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::NotFound);
                assert!(withdrawn && !accepted);
            }
        }
    }
    Ok(())
}

/// Registry whose writes always fail; reads go to the real listings.
struct ReadOnlyBooks(Arc<dyn BookRegistry>);

impl BookRegistry for ReadOnlyBooks {
    fn get_book(&self, id: &BookId) -> Result<Book> {
        self.0.get_book(id)
    }
    fn set_book_status(&self, _: &BookId, _: BookStatus) -> Result<()> {
        Err(TradeError::StoreUnavailable("books are read-only".into()))
    }
}

struct DeadSink;

impl NotificationSink for DeadSink {
    fn insert(&self, _: Notification) -> Result<()> {
        Err(TradeError::Timeout("notification insert".into()))
    }
}

fn service_for(
    world: &common::World,
    user: &UserId,
    books: Arc<dyn BookRegistry>,
    sink: Arc<dyn NotificationSink>,
) -> TradeService {
    TradeService::new(
        world.backend.offers().clone(),
        books,
        sink,
        Arc::new(Session::signed_in(user.clone())),
    )
}

#[test]
fn failed_side_effects_are_reported_not_raised() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = world.accepted_offer()?;
    world.alice.confirm_trade(&offer.id)?;

    let books: Arc<dyn BookRegistry> = Arc::new(world.backend.books().clone());
    let bob = service_for(
        &world,
        &world.bob_id,
        Arc::new(ReadOnlyBooks(books)),
        Arc::new(DeadSink),
    );
    let outcome = bob.confirm_trade(&offer.id)?;

    let Completion::Completed(report) = outcome.completion else {
        panic!("confirmation should still complete the trade");
    };
    assert_eq!(report.offer.status, OfferStatus::Completed);
    let effects: Vec<_> = report
        .side_effect_failures
        .iter()
        .map(|f| f.effect.clone())
        .collect();
    assert_eq!(
        effects,
        vec![
            SideEffect::BookSold(offer.offered_book_id.clone()),
            SideEffect::BookSold(offer.requested_book_id.clone()),
            SideEffect::Notification(world.alice_id.clone()),
            SideEffect::Notification(world.bob_id.clone()),
        ]
    );

    // the status is committed regardless; books stay as they were
    assert_eq!(world.alice.get_offer(&offer.id)?.status, OfferStatus::Completed);
    assert_eq!(
        world.backend.books().get_book(&offer.offered_book_id)?.status,
        BookStatus::Available
    );
    Ok(())
}

/// Store that can be switched into failing every call.
struct FlakyStore {
    inner: Arc<dyn OfferStore>,
    failing: AtomicUsize,
}

const HEALTHY: usize = 0;
const TIMING_OUT: usize = 1;
const UNAVAILABLE: usize = 2;
const WRITES_TIMING_OUT: usize = 3;

impl FlakyStore {
    fn check(&self, call: &str) -> Result<()> {
        match self.failing.load(Ordering::SeqCst) {
            HEALTHY => Ok(()),
            WRITES_TIMING_OUT if call != "update" => Ok(()),
            TIMING_OUT | WRITES_TIMING_OUT => Err(TradeError::Timeout(call.to_owned())),
            _ => Err(TradeError::StoreUnavailable(call.to_owned())),
        }
    }
}

impl OfferStore for FlakyStore {
    fn create(&self, offer: TradeOffer) -> Result<TradeOffer> {
        self.check("create")?;
        self.inner.create(offer)
    }
    fn get(&self, id: &OfferId) -> Result<TradeOffer> {
        self.check("get")?;
        self.inner.get(id)
    }
    fn list_by_receiver(&self, user: &UserId) -> Result<Vec<TradeOffer>> {
        self.check("list_by_receiver")?;
        self.inner.list_by_receiver(user)
    }
    fn list_by_offerer(&self, user: &UserId) -> Result<Vec<TradeOffer>> {
        self.check("list_by_offerer")?;
        self.inner.list_by_offerer(user)
    }
    fn update(&self, id: &OfferId, patch: &OfferPatch) -> Result<PatchOutcome> {
        self.check("update")?;
        self.inner.update(id, patch)
    }
    fn delete(&self, id: &OfferId, allowed: &[OfferStatus]) -> Result<DeleteOutcome> {
        self.check("delete")?;
        self.inner.delete(id, allowed)
    }
    fn subscribe_pending(&self, user: &UserId, on_change: ChangeCallback) -> Result<Subscription> {
        self.check("subscribe_pending")?;
        self.inner.subscribe_pending(user, on_change)
    }
}

#[test]
fn transient_store_failures_are_retryable() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = world.pending_offer()?;
    let flaky = Arc::new(FlakyStore {
        inner: world.backend.offers().clone(),
        failing: AtomicUsize::new(TIMING_OUT),
    });
    let bob = TradeService::new(
        flaky.clone(),
        Arc::new(world.backend.books().clone()),
        Arc::new(world.backend.notifications().clone()),
        world.bob_session.clone(),
    );

    let err = bob.accept_offer(&offer.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());

    flaky.failing.store(UNAVAILABLE, Ordering::SeqCst);
    let err = bob.received_offers().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(err.is_retryable());
    assert_eq!(world.bob.get_offer(&offer.id)?.status, OfferStatus::Pending);

    // the user retries once the store is back
    flaky.failing.store(HEALTHY, Ordering::SeqCst);
    assert_eq!(bob.accept_offer(&offer.id)?.status, OfferStatus::Accepted);
    Ok(())
}

#[test]
fn failed_completion_retry_still_returns_the_read() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = stuck_offer(&world)?;
    let flaky = Arc::new(FlakyStore {
        inner: world.backend.offers().clone(),
        failing: AtomicUsize::new(WRITES_TIMING_OUT),
    });
    let alice = TradeService::new(
        flaky.clone(),
        Arc::new(world.backend.books().clone()),
        Arc::new(world.backend.notifications().clone()),
        world.alice_session.clone(),
    );

    let read = alice.get_offer(&offer.id)?;
    assert_eq!(read.status, OfferStatus::Accepted);
    assert!(read.awaiting_completion());
    let listed = alice.sent_offers()?;
    assert_eq!(listed[0].status, OfferStatus::Accepted);

    // once writes go through again the next read completes it
    flaky.failing.store(HEALTHY, Ordering::SeqCst);
    assert_eq!(alice.get_offer(&offer.id)?.status, OfferStatus::Completed);
    Ok(())
}

fn wait_for(
    rx: &mpsc::Receiver<Vec<TradeOffer>>,
    want: impl Fn(&[TradeOffer]) -> bool,
) -> anyhow::Result<Vec<TradeOffer>> {
    loop {
        let snapshot = rx.recv_timeout(Duration::from_secs(5))?;
        if want(&snapshot) {
            return Ok(snapshot);
        }
    }
}

#[test]
fn pending_feed_follows_offer_lifecycle() -> anyhow::Result<()> {
    let world = common::world()?;
    let (tx, rx) = mpsc::channel();
    let feed = world.bob.watch_pending(move |offers| {
        let _ = tx.send(offers);
    })?;

    let initial = rx.recv_timeout(Duration::from_secs(5))?;
    assert!(initial.is_empty());

    let first = world.pending_offer()?;
    let second = world.pending_offer()?;
    let both = wait_for(&rx, |o| o.len() == 2)?;
    assert_eq!(both[0].id, second.id);
    assert_eq!(both[1].id, first.id);

    world.bob.accept_offer(&first.id)?;
    let left = wait_for(&rx, |o| o.len() == 1)?;
    assert_eq!(left[0].id, second.id);

    world.alice.delete_offer(&second.id)?;
    wait_for(&rx, |o| o.is_empty())?;

    feed.cancel();
    world.pending_offer()?;
    // drain anything sent before the cancel landed; nothing may follow it
    while rx.recv_timeout(Duration::from_millis(100)).is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    Ok(())
}

#[test]
fn feed_ignores_other_receivers() -> anyhow::Result<()> {
    let world = common::world()?;
    let (tx, rx) = mpsc::channel();
    let _feed = world.carol.watch_pending(move |offers| {
        let _ = tx.send(offers);
    })?;

    world.pending_offer()?;
    // carol keeps seeing an empty list while bob receives offers
    let snapshot = rx.recv_timeout(Duration::from_secs(5))?;
    assert!(snapshot.is_empty());
    while let Ok(snapshot) = rx.recv_timeout(Duration::from_millis(200)) {
        assert!(snapshot.is_empty());
    }
    Ok(())
}

#[test]
fn refused_actions_do_not_wake_the_feed() -> anyhow::Result<()> {
    let world = common::world()?;
    let offer = world.pending_offer()?;
    let (tx, rx) = mpsc::channel();
    let _feed = world.bob.watch_pending(move |offers| {
        let _ = tx.send(offers);
    })?;
    wait_for(&rx, |o| o.len() == 1)?;
    while rx.recv_timeout(Duration::from_millis(100)).is_ok() {}

    for _ in 0..3 {
        assert!(world.bob.delete_offer(&offer.id).is_err());
        assert!(world.alice.confirm_trade(&offer.id).is_err());
        assert!(world.alice.revoke_confirmation(&offer.id).is_err());
    }
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    world.bob.accept_offer(&offer.id)?;
    wait_for(&rx, |o| o.is_empty())?;
    Ok(())
}
