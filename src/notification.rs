//! In-app notifications recorded when a trade completes
use crate::error::{Result, SideEffect, SideEffectFailure, TradeError};
use crate::offer::TradeOffer;
use crate::store::{Collection, Record, Step};
use crate::types::{NotificationId, OfferId, Party, TimeStamp, UserId};
use crate::utils;
use chrono::Utc;
use tracing::{debug, warn};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    #[n(0)]
    TradeCompleted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradeCompleted => "trade_completed",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: NotificationId,
    #[n(1)]
    pub kind: NotificationKind,
    #[n(2)]
    pub offer_id: OfferId,
    #[n(3)]
    pub user_id: UserId,
    #[n(4)]
    pub message: String,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub read: bool,
}

impl Notification {
    /// One trade-completed record for `user`. The id depends only on the kind,
    /// offer and user, so emitting it twice leaves the first record in place.
    pub fn trade_completed(offer_id: &OfferId, user_id: &UserId, message: &str) -> Result<Self> {
        let kind = NotificationKind::TradeCompleted;
        let id = utils::digest_to_bech32(
            Self::HRP,
            &[kind.as_str(), offer_id.as_str(), user_id.as_str()],
        )
        .map_err(|e| TradeError::Codec(e.to_string()))?;

        Ok(Self {
            id: NotificationId::from(id),
            kind,
            offer_id: offer_id.clone(),
            user_id: user_id.clone(),
            message: message.to_owned(),
            created_at: TimeStamp::now(),
            read: false,
        })
    }
}

impl Record for Notification {
    type Id = NotificationId;
    const COLLECTION: &'static str = "notifications";
    const HRP: &'static str = "ntf_";

    fn id(&self) -> &NotificationId {
        &self.id
    }
    fn set_id(&mut self, id: NotificationId) {
        self.id = id;
    }
}

pub trait NotificationSink: Send + Sync {
    fn insert(&self, notification: Notification) -> Result<()>;
}

impl NotificationSink for Collection<Notification> {
    /// Insert-if-absent: a re-emitted notification keeps its read flag and timestamp.
    fn insert(&self, notification: Notification) -> Result<()> {
        if !self.insert_new(&notification)? {
            debug!(notification_id = %notification.id, "notification already recorded");
        }
        Ok(())
    }
}

impl Collection<Notification> {
    pub fn for_user(&self, user: &UserId) -> Result<Vec<Notification>> {
        self.query_ordered(
            |n| n.user_id == *user,
            |a, b| b.created_at.cmp(&a.created_at),
            None,
        )
    }

    pub fn mark_read(&self, id: &NotificationId) -> Result<()> {
        let updated = self.update(id, |n| {
            let mut next = n.clone();
            next.read = true;
            Step::Write(next, ())
        })?;
        updated.ok_or_else(|| TradeError::not_found("notification", id))
    }
}

/// Records a trade-completed notification for both parties. Fire-and-forget:
/// failures are logged and handed back, never raised.
pub fn emit_trade_completed(
    sink: &dyn NotificationSink,
    offer: &TradeOffer,
    message: &str,
) -> Vec<SideEffectFailure> {
    let mut failures = Vec::new();
    for party in [Party::Offerer, Party::Receiver] {
        let user = offer.user(party);
        let sent = Notification::trade_completed(&offer.id, user, message)
            .and_then(|n| sink.insert(n));
        match sent {
            Ok(()) => debug!(offer_id = %offer.id, user_id = %user, "completion notification recorded"),
            Err(error) => {
                warn!(offer_id = %offer.id, user_id = %user, %error, "completion notification failed");
                failures.push(SideEffectFailure {
                    effect: SideEffect::Notification(user.clone()),
                    reason: error.to_string(),
                });
            }
        }
    }
    failures
}
