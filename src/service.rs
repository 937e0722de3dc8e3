//! Service layer API for the trade offer workflow.
//!
//! Every action is a short sequence of single-record store calls: read, check
//! the guard, then a conditional write. There is no transaction across
//! records, so the completion step is a guarded `accepted -> completed` write
//! followed by best-effort side effects, and any client that later reads an
//! offer stuck with both confirmations set retries that write.
use crate::book::BookRegistry;
use crate::config::Config;
use crate::error::{Result, SideEffect, SideEffectFailure, TradeError, ValidationError};
use crate::identity::Identity;
use crate::notification::{self, NotificationSink};
use crate::offer::{OfferDraft, OfferPatch, PatchOutcome, TradeOffer};
use crate::store::{DeleteOutcome, OfferStore, Subscription};
use crate::types::{BookStatus, OfferId, OfferStatus, Party, UserId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of a committed `accepted -> completed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub offer: TradeOffer,
    /// Book or notification writes that failed after the status was committed.
    pub side_effect_failures: Vec<SideEffectFailure>,
}

impl CompletionReport {
    pub fn is_clean(&self) -> bool {
        self.side_effect_failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Not both confirmed (or no longer accepted); nothing written.
    NotReady,
    /// This call performed the transition. The rating flow is now open to both parties.
    Completed(CompletionReport),
    /// Another attempt got there first; no side effects were repeated.
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    /// The offer as read back from the store after the action.
    pub offer: TradeOffer,
    pub completion: Completion,
}

pub struct TradeService {
    offers: Arc<dyn OfferStore>,
    books: Arc<dyn BookRegistry>,
    notifications: Arc<dyn NotificationSink>,
    identity: Arc<dyn Identity>,
    completed_offers_to_show: usize,
    completion_message: String,
}

/// Keeps every non-completed offer and only the first `keep` completed ones.
/// Expects a newest-first listing.
pub fn trim_completed(offers: Vec<TradeOffer>, keep: usize) -> Vec<TradeOffer> {
    let mut completed = 0;
    offers
        .into_iter()
        .filter(|o| {
            if o.status != OfferStatus::Completed {
                return true;
            }
            completed += 1;
            completed <= keep
        })
        .collect()
}

impl TradeService {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        books: Arc<dyn BookRegistry>,
        notifications: Arc<dyn NotificationSink>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            offers,
            books,
            notifications,
            identity,
            completed_offers_to_show: Config::default().completed_offers_to_show,
            completion_message: Config::default().completion_message,
        }
    }

    pub fn configure(mut self, config: &Config) -> Self {
        self.completed_offers_to_show = config.completed_offers_to_show;
        self.completion_message = config.completion_message.clone();
        self
    }

    fn actor(&self) -> Result<UserId> {
        self.identity
            .current_user_id()
            .ok_or(TradeError::NotSignedIn)
    }

    fn party(&self, action: &'static str, offer: &TradeOffer, actor: &UserId) -> Result<Party> {
        offer
            .party_of(actor)
            .ok_or_else(|| TradeError::precondition(action, "not a party to this offer"))
    }

    fn commit(&self, action: &'static str, id: &OfferId, patch: &OfferPatch) -> Result<TradeOffer> {
        match self.offers.update(id, patch)? {
            PatchOutcome::Applied(offer) | PatchOutcome::Unchanged(offer) => Ok(offer),
            PatchOutcome::Conflict { conflict, .. } => {
                debug!(offer_id = %id, action, %conflict, "guard not met");
                Err(TradeError::precondition(action, conflict.to_string()))
            }
        }
    }

    /// Creates a pending offer of one of the actor's books for someone else's.
    pub fn create_offer(&self, draft: &OfferDraft) -> Result<TradeOffer> {
        let actor = self.actor()?;
        let (offered_id, requested_id) = draft.book_ids()?;
        let offered = self.books.get_book(offered_id)?;
        let requested = self.books.get_book(requested_id)?;

        if offered.owner_id != actor {
            return Err(ValidationError::NotBookOwner(offered.id).into());
        }
        if !offered.is_for_trade {
            return Err(ValidationError::NotForTrade(offered.id).into());
        }
        if requested.owner_id == actor {
            return Err(ValidationError::OwnBookRequested(requested.id).into());
        }
        for book in [&offered, &requested] {
            if book.status != BookStatus::Available {
                return Err(ValidationError::BookUnavailable {
                    book_id: book.id.clone(),
                    status: book.status,
                }
                .into());
            }
        }

        let offer = draft.validate_and_finalise(actor, requested.owner_id)?;
        let offer = self.offers.create(offer)?;
        info!(
            offer_id = %offer.id,
            offerer = %offer.offerer_id,
            receiver = %offer.receiver_id,
            "offer created"
        );
        Ok(offer)
    }

    fn receiver_decision(&self, id: &OfferId, action: &'static str, to: OfferStatus) -> Result<TradeOffer> {
        let actor = self.actor()?;
        let offer = self.offers.get(id)?;
        if offer.receiver_id != actor {
            return Err(TradeError::precondition(action, "only the receiver can decide on an offer"));
        }
        let patch = OfferPatch::new()
            .expect_status(OfferStatus::Pending)
            .set_status(to);
        let offer = self.commit(action, id, &patch)?;
        info!(offer_id = %id, actor = %actor, status = %offer.status, "offer decided");
        Ok(offer)
    }

    pub fn accept_offer(&self, id: &OfferId) -> Result<TradeOffer> {
        self.receiver_decision(id, "accept", OfferStatus::Accepted)
    }

    /// Rejecting an offer that is already rejected succeeds without a write.
    pub fn reject_offer(&self, id: &OfferId) -> Result<TradeOffer> {
        self.receiver_decision(id, "reject", OfferStatus::Rejected)
    }

    /// Records that the actor's side of the physical exchange happened. If that
    /// completes the pair, the offer is completed before returning.
    #[instrument(skip_all, fields(offer_id = %id))]
    pub fn confirm_trade(&self, id: &OfferId) -> Result<ConfirmOutcome> {
        let actor = self.actor()?;
        let offer = self.offers.get(id)?;
        let party = self.party("confirm", &offer, &actor)?;

        let patch = OfferPatch::new()
            .expect_status(OfferStatus::Accepted)
            .set_confirmed(party, true);
        match self.offers.update(id, &patch)? {
            PatchOutcome::Applied(_) | PatchOutcome::Unchanged(_) => {}
            // a repeated confirm after the trade already completed
            PatchOutcome::Conflict { current, .. }
                if current.status == OfferStatus::Completed && current.is_confirmed_by(party) =>
            {
                return Ok(ConfirmOutcome {
                    offer: current,
                    completion: Completion::AlreadyCompleted,
                });
            }
            PatchOutcome::Conflict { conflict, .. } => {
                return Err(TradeError::precondition("confirm", conflict.to_string()));
            }
        }
        info!(actor = %actor, %party, "confirmation set");

        // evaluate against the store, not the copy read before the write
        let fresh = self.offers.get(id)?;
        self.settle(fresh)
    }

    /// Withdraws the actor's own confirmation while the offer is still accepted.
    #[instrument(skip_all, fields(offer_id = %id))]
    pub fn revoke_confirmation(&self, id: &OfferId) -> Result<TradeOffer> {
        let actor = self.actor()?;
        let offer = self.offers.get(id)?;
        let party = self.party("revoke confirmation", &offer, &actor)?;

        let patch = OfferPatch::new()
            .expect_status(OfferStatus::Accepted)
            .expect_confirmed(party, true)
            .set_confirmed(party, false);
        let offer = self.commit("revoke confirmation", id, &patch)?;
        info!(actor = %actor, %party, "confirmation revoked");
        Ok(offer)
    }

    fn settle(&self, offer: TradeOffer) -> Result<ConfirmOutcome> {
        if offer.status == OfferStatus::Completed {
            return Ok(ConfirmOutcome {
                offer,
                completion: Completion::AlreadyCompleted,
            });
        }
        if !offer.awaiting_completion() {
            return Ok(ConfirmOutcome {
                offer,
                completion: Completion::NotReady,
            });
        }
        match self.complete_if_ready(&offer.id)? {
            Completion::Completed(report) => Ok(ConfirmOutcome {
                offer: report.offer.clone(),
                completion: Completion::Completed(report),
            }),
            completion => Ok(ConfirmOutcome {
                offer: self.offers.get(&offer.id)?,
                completion,
            }),
        }
    }

    /// The `accepted -> completed` transition. The write only lands if the
    /// stored record is still accepted with both confirmations set; only the
    /// call that lands it runs the side effects.
    pub fn complete_if_ready(&self, id: &OfferId) -> Result<Completion> {
        let patch = OfferPatch::new()
            .expect_status(OfferStatus::Accepted)
            .expect_confirmed(Party::Offerer, true)
            .expect_confirmed(Party::Receiver, true)
            .set_status(OfferStatus::Completed);

        match self.offers.update(id, &patch)? {
            PatchOutcome::Applied(offer) => {
                info!(offer_id = %id, "offer completed");
                let side_effect_failures = self.run_completion_effects(&offer);
                Ok(Completion::Completed(CompletionReport {
                    offer,
                    side_effect_failures,
                }))
            }
            PatchOutcome::Unchanged(_) => {
                debug!(offer_id = %id, "offer already completed");
                Ok(Completion::AlreadyCompleted)
            }
            PatchOutcome::Conflict { conflict, .. } => {
                debug!(offer_id = %id, %conflict, "offer not ready to complete");
                Ok(Completion::NotReady)
            }
        }
    }

    fn run_completion_effects(&self, offer: &TradeOffer) -> Vec<SideEffectFailure> {
        let mut failures = Vec::new();
        for book_id in [&offer.offered_book_id, &offer.requested_book_id] {
            if let Err(error) = self.books.set_book_status(book_id, BookStatus::Sold) {
                warn!(offer_id = %offer.id, book_id = %book_id, %error, "book status update failed after completion");
                failures.push(SideEffectFailure {
                    effect: SideEffect::BookSold(book_id.clone()),
                    reason: error.to_string(),
                });
            }
        }
        failures.extend(notification::emit_trade_completed(
            self.notifications.as_ref(),
            offer,
            &self.completion_message,
        ));
        failures
    }

    /// Withdrawal by the offerer while pending, or history cleanup by either
    /// party once rejected or completed.
    pub fn delete_offer(&self, id: &OfferId) -> Result<()> {
        let actor = self.actor()?;
        let offer = self.offers.get(id)?;
        let party = self.party("delete", &offer, &actor)?;
        let allowed: &[OfferStatus] = match party {
            Party::Offerer => &[
                OfferStatus::Pending,
                OfferStatus::Rejected,
                OfferStatus::Completed,
            ],
            Party::Receiver => &[OfferStatus::Rejected, OfferStatus::Completed],
        };

        match self.offers.delete(id, allowed)? {
            DeleteOutcome::Deleted(offer) => {
                info!(offer_id = %id, actor = %actor, status = %offer.status, "offer deleted");
                Ok(())
            }
            DeleteOutcome::Refused(current) => Err(TradeError::precondition(
                "delete",
                format!("{party} cannot delete an offer that is {}", current.status),
            )),
        }
    }

    /// Point read. An offer left accepted with both confirmations set is
    /// completed on the way out.
    pub fn get_offer(&self, id: &OfferId) -> Result<TradeOffer> {
        let offer = self.offers.get(id)?;
        Ok(self.heal_or_keep(offer))
    }

    fn heal(&self, offer: TradeOffer) -> Result<TradeOffer> {
        if !offer.awaiting_completion() {
            return Ok(offer);
        }
        warn!(offer_id = %offer.id, "both parties confirmed but offer still accepted, retrying completion");
        match self.complete_if_ready(&offer.id)? {
            Completion::Completed(report) => Ok(report.offer),
            _ => self.offers.get(&offer.id),
        }
    }

    // reads still succeed if a retried completion fails; the next read tries again
    fn heal_or_keep(&self, offer: TradeOffer) -> TradeOffer {
        let id = offer.id.clone();
        self.heal(offer.clone()).unwrap_or_else(|error| {
            warn!(offer_id = %id, %error, "completion retry failed");
            offer
        })
    }

    fn heal_all(&self, offers: Vec<TradeOffer>) -> Vec<TradeOffer> {
        offers.into_iter().map(|o| self.heal_or_keep(o)).collect()
    }

    /// Offers the signed-in user received, newest first.
    pub fn received_offers(&self) -> Result<Vec<TradeOffer>> {
        let actor = self.actor()?;
        let offers = self.heal_all(self.offers.list_by_receiver(&actor)?);
        Ok(trim_completed(offers, self.completed_offers_to_show))
    }

    /// Offers the signed-in user sent, newest first.
    pub fn sent_offers(&self) -> Result<Vec<TradeOffer>> {
        let actor = self.actor()?;
        let offers = self.heal_all(self.offers.list_by_offerer(&actor)?);
        Ok(trim_completed(offers, self.completed_offers_to_show))
    }

    pub fn pending_received_count(&self) -> Result<usize> {
        let actor = self.actor()?;
        Ok(self
            .offers
            .list_by_receiver(&actor)?
            .iter()
            .filter(|o| o.status == OfferStatus::Pending)
            .count())
    }

    /// Live feed of the signed-in user's received pending offers.
    pub fn watch_pending(
        &self,
        on_change: impl FnMut(Vec<TradeOffer>) + Send + 'static,
    ) -> Result<Subscription> {
        let actor = self.actor()?;
        debug!(user_id = %actor, "watching pending offers");
        self.offers.subscribe_pending(&actor, Box::new(on_change))
    }
}
