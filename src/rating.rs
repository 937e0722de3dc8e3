//! Post-completion ratings, one per party per offer
use crate::error::{Result, TradeError, ValidationError};
use crate::identity::Identity;
use crate::offer::{OfferPatch, PatchOutcome, TradeOffer};
use crate::store::{Collection, OfferStore, Record};
use crate::types::{BookId, OfferId, OfferStatus, RatingId, TimeStamp, UserId};
use crate::utils;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Rating {
    #[n(0)]
    pub id: RatingId,
    #[n(1)]
    pub rater_id: UserId,
    #[n(2)]
    pub target_user_id: UserId,
    #[n(3)]
    pub offer_id: OfferId,
    #[n(4)]
    pub book_id: Option<BookId>,
    #[n(5)]
    pub score: u8,
    #[n(6)]
    pub comment: String,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Rating {
    type Id = RatingId;
    const COLLECTION: &'static str = "ratings";
    const HRP: &'static str = "rating_";

    fn id(&self) -> &RatingId {
        &self.id
    }
    fn set_id(&mut self, id: RatingId) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RatingOutcome {
    Recorded(Rating),
    /// This party already rated this offer; nothing new was written.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RatingSummary {
    pub average: f64,
    pub total: usize,
}

pub struct RatingGate {
    offers: Arc<dyn OfferStore>,
    ratings: Collection<Rating>,
    identity: Arc<dyn Identity>,
}

impl RatingGate {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        ratings: Collection<Rating>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            offers,
            ratings,
            identity,
        }
    }

    /// Whether the signed-in user should be shown the rating flow for `offer`.
    pub fn is_unlocked(&self, offer: &TradeOffer) -> bool {
        let Some(user) = self.identity.current_user_id() else {
            return false;
        };
        match offer.party_of(&user) {
            Some(party) => offer.status == OfferStatus::Completed && !offer.has_rated(party),
            None => false,
        }
    }

    /// Rates the counterparty of a completed offer. A repeat attempt by the same
    /// party is a no-op reported as [`RatingOutcome::Duplicate`].
    pub fn submit(&self, offer_id: &OfferId, score: u8, comment: &str) -> Result<RatingOutcome> {
        let rater = self
            .identity
            .current_user_id()
            .ok_or(TradeError::NotSignedIn)?;
        let offer = self.offers.get(offer_id)?;
        let party = offer
            .party_of(&rater)
            .ok_or_else(|| TradeError::precondition("rate", "only a party to the trade can rate it"))?;
        if offer.status != OfferStatus::Completed {
            return Err(TradeError::precondition(
                "rate",
                format!("offer is {}, not completed", offer.status),
            ));
        }
        if offer.has_rated(party) {
            debug!(offer_id = %offer_id, rater = %rater, "duplicate rating ignored");
            return Ok(RatingOutcome::Duplicate);
        }
        if !(1..=5).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange(score).into());
        }
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }

        let id = utils::digest_to_bech32(Rating::HRP, &[offer_id.as_str(), rater.as_str()])
            .map_err(|e| TradeError::Codec(e.to_string()))?;
        let rating = Rating {
            id: RatingId::from(id),
            rater_id: rater.clone(),
            target_user_id: offer.user(party.other()).clone(),
            offer_id: offer_id.clone(),
            book_id: Some(offer.book_received_by(party).clone()),
            score,
            comment: comment.to_owned(),
            created_at: TimeStamp::now(),
        };
        let inserted = self.ratings.insert_new(&rating)?;

        // Stamp even when the rating already existed, so an earlier attempt that
        // died between the two writes stops re-triggering the flow.
        let stamp = OfferPatch::new()
            .expect_status(OfferStatus::Completed)
            .set_rated(party);
        if let PatchOutcome::Conflict { conflict, .. } = self.offers.update(offer_id, &stamp)? {
            return Err(TradeError::precondition("rate", conflict.to_string()));
        }

        if !inserted {
            debug!(offer_id = %offer_id, rater = %rater, "rating already recorded");
            return Ok(RatingOutcome::Duplicate);
        }
        info!(offer_id = %offer_id, rater = %rater, target = %rating.target_user_id, score, "rating recorded");
        Ok(RatingOutcome::Recorded(rating))
    }

    pub fn received_by(&self, user: &UserId) -> Result<Vec<Rating>> {
        self.ratings.query_ordered(
            |r| r.target_user_id == *user,
            |a, b| b.created_at.cmp(&a.created_at),
            None,
        )
    }

    pub fn given_by(&self, user: &UserId) -> Result<Vec<Rating>> {
        self.ratings.query_ordered(
            |r| r.rater_id == *user,
            |a, b| b.created_at.cmp(&a.created_at),
            None,
        )
    }

    /// Average score over every rating `user` has received; zero when none.
    pub fn summary_for(&self, user: &UserId) -> Result<RatingSummary> {
        let received = self.received_by(user)?;
        if received.is_empty() {
            return Ok(RatingSummary::default());
        }
        let sum: u32 = received.iter().map(|r| u32::from(r.score)).sum();
        Ok(RatingSummary {
            average: f64::from(sum) / received.len() as f64,
            total: received.len(),
        })
    }
}
