//! Document store adapter over sled.
//!
//! [`Collection`] is the generic record store every other module builds on:
//! create, point read, filtered query, atomic per-record update, delete and a
//! live change feed. There are no cross-record transactions; callers that need
//! to coordinate several records do so with guarded single-record updates.
use crate::error::{Result, TradeError};
use crate::offer::{OfferPatch, PatchOutcome, TradeOffer};
use crate::types::{OfferId, OfferStatus, TimeStamp, UserId};
use crate::utils;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// A record that lives in its own sled tree, keyed by its id.
pub trait Record:
    Clone + Send + Sync + 'static + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>
{
    type Id: Clone + AsRef<str> + From<String>;

    /// Tree name, also used in error messages.
    const COLLECTION: &'static str;
    /// Human readable prefix for generated ids.
    const HRP: &'static str;

    fn id(&self) -> &Self::Id;
    fn set_id(&mut self, id: Self::Id);
}

/// What an [`Collection::update`] closure decided for the record it was shown.
pub enum Step<T, R> {
    Write(T, R),
    Delete(R),
    Keep(R),
}

pub struct Collection<T> {
    tree: sled::Tree,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            _record: PhantomData,
        }
    }
}

fn encode<T: Record>(record: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(record)?)
}

fn decode<T: Record>(bytes: &[u8]) -> Result<T> {
    Ok(minicbor::decode(bytes)?)
}

impl<T: Record> Collection<T> {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(T::COLLECTION)?,
            _record: PhantomData,
        })
    }

    /// Stores a new record under a freshly generated id and returns it.
    pub fn create(&self, mut record: T) -> Result<T> {
        let id = utils::new_uuid_to_bech32(T::HRP).map_err(|e| TradeError::Codec(e.to_string()))?;
        record.set_id(T::Id::from(id));
        self.tree
            .insert(record.id().as_ref().as_bytes(), encode(&record)?)?;
        debug!(collection = T::COLLECTION, id = record.id().as_ref(), "record created");
        Ok(record)
    }

    /// Upsert under the record's own id.
    pub fn put(&self, record: &T) -> Result<()> {
        self.tree
            .insert(record.id().as_ref().as_bytes(), encode(record)?)?;
        Ok(())
    }

    /// Insert-if-absent. `false` when a record with that id already exists.
    pub fn insert_new(&self, record: &T) -> Result<bool> {
        let swapped = self.tree.compare_and_swap(
            record.id().as_ref().as_bytes(),
            None as Option<&[u8]>,
            Some(encode(record)?),
        )?;
        Ok(swapped.is_ok())
    }

    pub fn get(&self, id: &T::Id) -> Result<Option<T>> {
        match self.tree.get(id.as_ref().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Point read that treats a missing record as [`TradeError::NotFound`].
    pub fn fetch(&self, id: &T::Id) -> Result<T> {
        self.get(id)?
            .ok_or_else(|| TradeError::not_found(T::COLLECTION, id.as_ref()))
    }

    /// Snapshot of every record matching `filter`.
    pub fn query(&self, filter: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let mut found = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let record = decode::<T>(&bytes)?;
            if filter(&record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    pub fn query_ordered(
        &self,
        filter: impl Fn(&T) -> bool,
        order: impl FnMut(&T, &T) -> Ordering,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let mut found = self.query(filter)?;
        found.sort_by(order);
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    /// Atomic read-modify-write of one record. `f` may run more than once under
    /// contention, so it must be free of side effects. Returns `None` when the
    /// record does not exist. A `Keep` step writes nothing, so change feeds
    /// stay quiet for refused updates.
    pub fn update<R>(&self, id: &T::Id, mut f: impl FnMut(&T) -> Step<T, R>) -> Result<Option<R>> {
        let key = id.as_ref().as_bytes();
        loop {
            let Some(stored) = self.tree.get(key)? else {
                return Ok(None);
            };
            let current = decode::<T>(&stored)?;
            let (next, outcome) = match f(&current) {
                Step::Keep(r) => return Ok(Some(r)),
                Step::Write(next, r) => (Some(encode(&next)?), r),
                Step::Delete(r) => (None, r),
            };
            match self.tree.compare_and_swap(key, Some(stored), next)? {
                Ok(()) => return Ok(Some(outcome)),
                Err(_) => {
                    debug!(collection = T::COLLECTION, id = id.as_ref(), "concurrent write, retrying update");
                }
            }
        }
    }

    pub fn delete(&self, id: &T::Id) -> Result<bool> {
        Ok(self.tree.remove(id.as_ref().as_bytes())?.is_some())
    }

    /// Live feed of the records matching `filter`. `on_change` receives the full
    /// matching set once immediately and again after every write to the
    /// collection. The feed runs on its own thread until the returned handle is
    /// cancelled or dropped; `poll` bounds how long cancellation can take.
    pub fn subscribe(
        &self,
        filter: impl Fn(&T) -> bool + Send + 'static,
        poll: Duration,
        mut on_change: impl FnMut(Vec<T>) + Send + 'static,
    ) -> Result<Subscription> {
        let mut events = self.tree.watch_prefix(Vec::<u8>::new());
        let initial = self.query(&filter)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let collection = self.clone();
        let flag = Arc::clone(&stopped);

        let handle = std::thread::spawn(move || {
            on_change(initial);
            while !flag.load(AtomicOrdering::Acquire) {
                match events.next_timeout(poll) {
                    Ok(_) => match collection.query(&filter) {
                        Ok(items) => on_change(items),
                        Err(error) => {
                            warn!(collection = T::COLLECTION, %error, "subscription query failed")
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(collection = T::COLLECTION, "subscription closed");
        });

        Ok(Subscription {
            stopped,
            handle: Some(handle),
        })
    }
}

/// Handle to a live feed started by [`Collection::subscribe`].
pub struct Subscription {
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stops the feed and waits for its thread to exit. No callback runs afterwards.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.stopped.store(true, AtomicOrdering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Record for TradeOffer {
    type Id = OfferId;
    const COLLECTION: &'static str = "trade_offers";
    const HRP: &'static str = "offer_";

    fn id(&self) -> &OfferId {
        &self.id
    }
    fn set_id(&mut self, id: OfferId) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(TradeOffer),
    /// The stored status was not one of the allowed ones; nothing was removed.
    Refused(TradeOffer),
}

pub type ChangeCallback = Box<dyn FnMut(Vec<TradeOffer>) + Send + 'static>;

/// Persistence contract of the trade workflow. Every call is a single-record
/// operation; reads are consistent as of query time.
pub trait OfferStore: Send + Sync {
    fn create(&self, offer: TradeOffer) -> Result<TradeOffer>;
    fn get(&self, id: &OfferId) -> Result<TradeOffer>;
    fn list_by_receiver(&self, user: &UserId) -> Result<Vec<TradeOffer>>;
    fn list_by_offerer(&self, user: &UserId) -> Result<Vec<TradeOffer>>;
    /// Applies `patch` atomically against the stored record.
    fn update(&self, id: &OfferId, patch: &OfferPatch) -> Result<PatchOutcome>;
    /// Removes the record only if its current status is in `allowed`.
    fn delete(&self, id: &OfferId, allowed: &[OfferStatus]) -> Result<DeleteOutcome>;
    /// Live feed of offers with `receiver_id == user` and `status == pending`.
    fn subscribe_pending(&self, user: &UserId, on_change: ChangeCallback) -> Result<Subscription>;
}

fn newest_first(a: &TradeOffer, b: &TradeOffer) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// sled-backed [`OfferStore`].
#[derive(Clone)]
pub struct SledOfferStore {
    offers: Collection<TradeOffer>,
    poll: Duration,
}

impl SledOfferStore {
    pub fn new(offers: Collection<TradeOffer>, poll: Duration) -> Self {
        Self { offers, poll }
    }
}

impl OfferStore for SledOfferStore {
    fn create(&self, offer: TradeOffer) -> Result<TradeOffer> {
        self.offers.create(offer)
    }

    fn get(&self, id: &OfferId) -> Result<TradeOffer> {
        self.offers.fetch(id)
    }

    fn list_by_receiver(&self, user: &UserId) -> Result<Vec<TradeOffer>> {
        self.offers
            .query_ordered(|o| o.receiver_id == *user, newest_first, None)
    }

    fn list_by_offerer(&self, user: &UserId) -> Result<Vec<TradeOffer>> {
        self.offers
            .query_ordered(|o| o.offerer_id == *user, newest_first, None)
    }

    fn update(&self, id: &OfferId, patch: &OfferPatch) -> Result<PatchOutcome> {
        let outcome = self.offers.update(id, |current| {
            match patch.apply(current, TimeStamp::now()) {
                PatchOutcome::Applied(next) => {
                    Step::Write(next.clone(), PatchOutcome::Applied(next))
                }
                other => Step::Keep(other),
            }
        })?;
        outcome.ok_or_else(|| TradeError::not_found("offer", id))
    }

    fn delete(&self, id: &OfferId, allowed: &[OfferStatus]) -> Result<DeleteOutcome> {
        let outcome = self.offers.update(id, |current| {
            if allowed.contains(&current.status) {
                Step::Delete(DeleteOutcome::Deleted(current.clone()))
            } else {
                Step::Keep(DeleteOutcome::Refused(current.clone()))
            }
        })?;
        outcome.ok_or_else(|| TradeError::not_found("offer", id))
    }

    fn subscribe_pending(
        &self,
        user: &UserId,
        mut on_change: ChangeCallback,
    ) -> Result<Subscription> {
        let user = user.clone();
        self.offers.subscribe(
            move |o| o.receiver_id == user && o.status == OfferStatus::Pending,
            self.poll,
            move |mut items| {
                items.sort_by(newest_first);
                on_change(items)
            },
        )
    }
}
