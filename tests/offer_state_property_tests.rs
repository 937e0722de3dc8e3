//! Property-based tests for the offer state machine
//!
//! Random sequences of actions by the offerer, the receiver and a stranger are
//! played against one offer. Whatever the order, the stored record must only
//! ever move along the legal transitions, and the visible state must never be
//! an accepted offer with both confirmations set.

mod common;

use book_exchange::book::BookRegistry;
use book_exchange::service::TradeService;
use book_exchange::types::{BookStatus, OfferStatus};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Actor {
    Offerer,
    Receiver,
    Stranger,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Accept,
    Reject,
    Confirm,
    Revoke,
    Delete,
    Read,
}

// PROPERTY TEST STRATEGIES

fn actor_strategy() -> impl Strategy<Value = Actor> {
    prop_oneof![
        3 => Just(Actor::Offerer),
        3 => Just(Actor::Receiver),
        1 => Just(Actor::Stranger),
    ]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => Just(Action::Accept),
        1 => Just(Action::Reject),
        4 => Just(Action::Confirm),
        2 => Just(Action::Revoke),
        1 => Just(Action::Delete),
        1 => Just(Action::Read),
    ]
}

fn script_strategy() -> impl Strategy<Value = Vec<(Actor, Action)>> {
    prop::collection::vec((actor_strategy(), action_strategy()), 1..16)
}

fn rank(status: OfferStatus) -> u8 {
    match status {
        OfferStatus::Pending => 0,
        OfferStatus::Accepted => 1,
        OfferStatus::Rejected | OfferStatus::Completed => 2,
    }
}

fn play(service: &TradeService, action: Action, id: &book_exchange::types::OfferId) {
    // refused actions are part of the exploration; only the stored state matters
    let _ = match action {
        Action::Accept => service.accept_offer(id).map(drop),
        Action::Reject => service.reject_offer(id).map(drop),
        Action::Confirm => service.confirm_trade(id).map(drop),
        Action::Revoke => service.revoke_confirmation(id).map(drop),
        Action::Delete => service.delete_offer(id),
        Action::Read => service.get_offer(id).map(drop),
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Status only moves forward, terminal states stick, and a visible offer
    /// is never left accepted with both confirmations set.
    #[test]
    fn offer_follows_legal_transitions(script in script_strategy()) {
        let world = common::world().unwrap();
        let offer = world.pending_offer().unwrap();
        let mut last = offer.status;

        for (actor, action) in script {
            let service = match actor {
                Actor::Offerer => &world.alice,
                Actor::Receiver => &world.bob,
                Actor::Stranger => &world.carol,
            };
            play(service, action, &offer.id);

            let Ok(seen) = world.alice.get_offer(&offer.id) else {
                // deleted; nothing more can happen to it
                break;
            };
            prop_assert!(rank(seen.status) >= rank(last), "{last} moved back to {}", seen.status);
            if last.is_terminal() {
                prop_assert_eq!(seen.status, last);
            }
            prop_assert!(!seen.awaiting_completion());
            if seen.offerer_confirmed.is_some() || seen.receiver_confirmed.is_some() {
                prop_assert!(matches!(seen.status, OfferStatus::Accepted | OfferStatus::Completed));
            }
            if seen.status == OfferStatus::Completed {
                prop_assert!(seen.both_confirmed());
                let books = world.backend.books();
                prop_assert_eq!(books.get_book(&seen.offered_book_id).unwrap().status, BookStatus::Sold);
                prop_assert_eq!(books.get_book(&seen.requested_book_id).unwrap().status, BookStatus::Sold);
            }
            last = seen.status;
        }
    }

    /// A stranger can never change anything about the offer.
    #[test]
    fn strangers_have_no_effect(actions in prop::collection::vec(action_strategy(), 1..8)) {
        let world = common::world().unwrap();
        let offer = world.accepted_offer().unwrap();

        for action in actions {
            play(&world.carol, action, &offer.id);
        }
        let stored = world.bob.get_offer(&offer.id).unwrap();
        prop_assert_eq!(stored.status, OfferStatus::Accepted);
        prop_assert_eq!(stored.offerer_confirmed, None);
        prop_assert_eq!(stored.receiver_confirmed, None);
    }
}
