//! Guard against applying results of abandoned actions.
//!
//! A client screen observes one offer at a time. Every action started against
//! it takes an [`ActionTicket`]; when the action finishes its result is only
//! stored if the screen still observes the same offer under the same
//! observation. Navigating away or switching offers silently drops late results.
use crate::offer::TradeOffer;
use crate::types::OfferId;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTicket {
    offer_id: OfferId,
    generation: u64,
}

impl ActionTicket {
    pub fn offer_id(&self) -> &OfferId {
        &self.offer_id
    }
}

#[derive(Debug, Default)]
struct Observation {
    offer_id: Option<OfferId>,
    generation: u64,
    offer: Option<TradeOffer>,
}

#[derive(Debug, Default)]
pub struct ObservedOffer {
    state: Mutex<Observation>,
}

impl ObservedOffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Observation> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Starts observing `offer_id`. Tickets from earlier observations go stale.
    pub fn observe(&self, offer_id: OfferId) -> ActionTicket {
        let mut state = self.lock();
        state.generation += 1;
        state.offer_id = Some(offer_id.clone());
        state.offer = None;
        ActionTicket {
            offer_id,
            generation: state.generation,
        }
    }

    /// Ticket for a new action against the offer currently observed.
    pub fn ticket(&self) -> Option<ActionTicket> {
        let state = self.lock();
        state.offer_id.clone().map(|offer_id| ActionTicket {
            offer_id,
            generation: state.generation,
        })
    }

    /// Stops observing; every outstanding ticket goes stale.
    pub fn leave(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.offer_id = None;
        state.offer = None;
    }

    /// Stores `offer` if `ticket` is still current. Returns whether it was applied.
    pub fn apply(&self, ticket: &ActionTicket, offer: TradeOffer) -> bool {
        let mut state = self.lock();
        let current = state.generation == ticket.generation
            && state.offer_id.as_ref() == Some(&ticket.offer_id)
            && offer.id == ticket.offer_id;
        if current {
            state.offer = Some(offer);
        } else {
            debug!(offer_id = %ticket.offer_id, "dropping result of abandoned action");
        }
        current
    }

    pub fn current(&self) -> Option<TradeOffer> {
        self.lock().offer.clone()
    }
}
