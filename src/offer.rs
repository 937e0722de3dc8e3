//! Trade offer record, draft builder and field-level patches
use crate::error::ValidationError;
use crate::types::{BookId, OfferId, OfferStatus, Party, TimeStamp, UserId};
use chrono::Utc;
use std::fmt;

// Field names on the wire are the store's concern; the CBOR indices below are
// stable and must not be reused.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
    #[n(0)]
    pub id: OfferId,
    #[n(1)]
    pub offered_book_id: BookId,
    #[n(2)]
    pub requested_book_id: BookId,
    #[n(3)]
    pub offerer_id: UserId,
    #[n(4)]
    pub receiver_id: UserId,
    #[n(5)]
    pub status: OfferStatus,
    #[n(6)]
    pub message: Option<String>, // immutable after creation
    #[n(7)]
    pub offerer_confirmed: Option<bool>,
    #[n(8)]
    pub receiver_confirmed: Option<bool>,
    #[n(9)]
    pub offerer_rated: Option<bool>,
    #[n(10)]
    pub receiver_rated: Option<bool>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

impl TradeOffer {
    pub fn party_of(&self, user: &UserId) -> Option<Party> {
        if *user == self.offerer_id {
            Some(Party::Offerer)
        } else if *user == self.receiver_id {
            Some(Party::Receiver)
        } else {
            None
        }
    }
    pub fn user(&self, party: Party) -> &UserId {
        match party {
            Party::Offerer => &self.offerer_id,
            Party::Receiver => &self.receiver_id,
        }
    }
    /// The book `party` ends up with once the trade completes.
    pub fn book_received_by(&self, party: Party) -> &BookId {
        match party {
            Party::Offerer => &self.requested_book_id,
            Party::Receiver => &self.offered_book_id,
        }
    }
    pub fn confirmation(&self, party: Party) -> Option<bool> {
        match party {
            Party::Offerer => self.offerer_confirmed,
            Party::Receiver => self.receiver_confirmed,
        }
    }
    pub fn is_confirmed_by(&self, party: Party) -> bool {
        self.confirmation(party) == Some(true)
    }
    pub fn both_confirmed(&self) -> bool {
        self.is_confirmed_by(Party::Offerer) && self.is_confirmed_by(Party::Receiver)
    }
    /// Accepted with both confirmations set: the completion step has not run yet
    /// (or crashed) and must be retried by whoever observes this.
    pub fn awaiting_completion(&self) -> bool {
        self.status == OfferStatus::Accepted && self.both_confirmed()
    }
    pub fn has_rated(&self, party: Party) -> bool {
        let rated = match party {
            Party::Offerer => self.offerer_rated,
            Party::Receiver => self.receiver_rated,
        };
        rated == Some(true)
    }
}

/// Builder for a new offer, the basis of [`crate::service::TradeService::create_offer`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OfferDraft {
    pub offered_book_id: Option<BookId>,
    pub requested_book_id: Option<BookId>,
    pub message: Option<String>,
}

impl OfferDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn offer_book(mut self, book_id: impl Into<BookId>) -> Self {
        self.offered_book_id = Some(book_id.into());
        self
    }
    pub fn request_book(mut self, book_id: impl Into<BookId>) -> Self {
        self.requested_book_id = Some(book_id.into());
        self
    }
    pub fn set_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
    /// Both book ids, checked to be present and distinct.
    pub fn book_ids(&self) -> Result<(&BookId, &BookId), ValidationError> {
        let (Some(offered), Some(requested)) = (&self.offered_book_id, &self.requested_book_id)
        else {
            return Err(ValidationError::MissingBook);
        };
        if offered == requested {
            return Err(ValidationError::SameBook);
        }
        Ok((offered, requested))
    }
    /// Checks what can be checked without touching the store and builds the
    /// pending record. The id is left empty for the store to assign.
    pub fn validate_and_finalise(
        &self,
        offerer_id: UserId,
        receiver_id: UserId,
    ) -> Result<TradeOffer, ValidationError> {
        let (offered, requested) = self.book_ids()?;
        if offerer_id == receiver_id {
            return Err(ValidationError::SameParty);
        }

        let message = self
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_owned);
        let now = TimeStamp::now();

        Ok(TradeOffer {
            id: OfferId::from(String::new()),
            offered_book_id: offered.clone(),
            requested_book_id: requested.clone(),
            offerer_id,
            receiver_id,
            status: OfferStatus::Pending,
            message,
            offerer_confirmed: None,
            receiver_confirmed: None,
            offerer_rated: None,
            receiver_rated: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

/// Why a patch was refused. Nothing is written when any of these fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Status {
        expected: OfferStatus,
        actual: OfferStatus,
    },
    Confirmation {
        party: Party,
        expected: bool,
    },
    Transition {
        from: OfferStatus,
        to: OfferStatus,
    },
    ConfirmationOutsideAccepted(OfferStatus),
    RatingBeforeCompletion(OfferStatus),
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { expected, actual } => {
                write!(f, "offer is {actual}, expected {expected}")
            }
            Self::Confirmation { party, expected } => {
                write!(f, "{party} confirmation is not {expected}")
            }
            Self::Transition { from, to } => write!(f, "cannot move offer from {from} to {to}"),
            Self::ConfirmationOutsideAccepted(status) => {
                write!(f, "confirmations can only change while accepted, offer is {status}")
            }
            Self::RatingBeforeCompletion(status) => {
                write!(f, "ratings can only be recorded once completed, offer is {status}")
            }
        }
    }
}

/// Result of applying an [`OfferPatch`] to the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Written; `updated_at` refreshed.
    Applied(TradeOffer),
    /// The patch only restated a terminal status that is already stored.
    Unchanged(TradeOffer),
    Conflict {
        current: TradeOffer,
        conflict: Conflict,
    },
}

impl PatchOutcome {
    pub fn offer(&self) -> &TradeOffer {
        match self {
            Self::Applied(offer) | Self::Unchanged(offer) => offer,
            Self::Conflict { current, .. } => current,
        }
    }
}

/// Field-level partial update of a [`TradeOffer`] with optimistic preconditions.
/// Never a full-record overwrite: fields left `None` keep their stored value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OfferPatch {
    expect_status: Option<OfferStatus>,
    expect_confirmed: Vec<(Party, bool)>,
    status: Option<OfferStatus>,
    offerer_confirmed: Option<bool>,
    receiver_confirmed: Option<bool>,
    offerer_rated: Option<bool>,
    receiver_rated: Option<bool>,
}

impl OfferPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn expect_status(mut self, status: OfferStatus) -> Self {
        self.expect_status = Some(status);
        self
    }
    /// Absent confirmations count as `false`.
    pub fn expect_confirmed(mut self, party: Party, value: bool) -> Self {
        self.expect_confirmed.push((party, value));
        self
    }
    pub fn set_status(mut self, status: OfferStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_confirmed(mut self, party: Party, value: bool) -> Self {
        match party {
            Party::Offerer => self.offerer_confirmed = Some(value),
            Party::Receiver => self.receiver_confirmed = Some(value),
        }
        self
    }
    pub fn set_rated(mut self, party: Party) -> Self {
        match party {
            Party::Offerer => self.offerer_rated = Some(true),
            Party::Receiver => self.receiver_rated = Some(true),
        }
        self
    }

    fn touches_confirmations(&self) -> bool {
        self.offerer_confirmed.is_some() || self.receiver_confirmed.is_some()
    }
    fn touches_ratings(&self) -> bool {
        self.offerer_rated.is_some() || self.receiver_rated.is_some()
    }

    /// Pure guard-and-merge step; the store runs it inside its atomic
    /// read-modify-write so the checks see the value actually being replaced.
    pub fn apply(&self, current: &TradeOffer, now: TimeStamp<Utc>) -> PatchOutcome {
        let conflict = |conflict| PatchOutcome::Conflict {
            current: current.clone(),
            conflict,
        };

        // Restating a terminal status already stored is a no-op, whatever else was expected.
        let restates_terminal = self
            .status
            .is_some_and(|next| current.status.is_terminal() && next == current.status);
        if restates_terminal && !self.touches_confirmations() && !self.touches_ratings() {
            return PatchOutcome::Unchanged(current.clone());
        }
        if let Some(expected) = self.expect_status {
            if expected != current.status {
                return conflict(Conflict::Status {
                    expected,
                    actual: current.status,
                });
            }
        }

        for (party, expected) in &self.expect_confirmed {
            if current.is_confirmed_by(*party) != *expected {
                return conflict(Conflict::Confirmation {
                    party: *party,
                    expected: *expected,
                });
            }
        }

        if let Some(next) = self.status {
            if !current.status.can_transition_to(next) {
                return conflict(Conflict::Transition {
                    from: current.status,
                    to: next,
                });
            }
        }
        if self.touches_confirmations() && current.status != OfferStatus::Accepted {
            return conflict(Conflict::ConfirmationOutsideAccepted(current.status));
        }
        let resulting = self.status.unwrap_or(current.status);
        if self.touches_ratings() && resulting != OfferStatus::Completed {
            return conflict(Conflict::RatingBeforeCompletion(current.status));
        }

        let mut next = current.clone();
        next.status = resulting;
        if let Some(v) = self.offerer_confirmed {
            next.offerer_confirmed = Some(v);
        }
        if let Some(v) = self.receiver_confirmed {
            next.receiver_confirmed = Some(v);
        }
        if let Some(v) = self.offerer_rated {
            next.offerer_rated = Some(v);
        }
        if let Some(v) = self.receiver_rated {
            next.receiver_rated = Some(v);
        }
        next.updated_at = now;

        PatchOutcome::Applied(next)
    }
}
