//! Walks two users through a complete trade on a throwaway database.
//!
//! Run with `RUST_LOG=book_exchange=debug` to see every guarded write.
use book_exchange::backend::Backend;
use book_exchange::book::NewBook;
use book_exchange::identity::Session;
use book_exchange::offer::OfferDraft;
use book_exchange::rating::RatingOutcome;
use book_exchange::service::Completion;
use book_exchange::telemetry;
use book_exchange::utils;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let backend = Backend::temporary()?;
    let alice = Arc::new(Session::signed_in(utils::new_uuid_to_bech32("user_")?));
    let bob = Arc::new(Session::signed_in(utils::new_uuid_to_bech32("user_")?));

    let dune = backend
        .catalog(alice.clone())
        .add_book(NewBook::new("Dune", "Frank Herbert").for_trade(), vec![])?;
    let emma = backend
        .catalog(bob.clone())
        .add_book(NewBook::new("Emma", "Jane Austen").for_trade(), vec![])?;

    let alice_trades = backend.trade_service(alice.clone());
    let bob_trades = backend.trade_service(bob.clone());

    let _feed = bob_trades.watch_pending(|offers| {
        println!("bob has {} pending offer(s)", offers.len());
    })?;

    let offer = alice_trades.create_offer(
        &OfferDraft::new()
            .offer_book(dune.id.clone())
            .request_book(emma.id.clone())
            .set_message("My Dune for your Emma?"),
    )?;
    println!("offer {} is {}", offer.id, offer.status);

    let offer = bob_trades.accept_offer(&offer.id)?;
    println!("offer {} is {}", offer.id, offer.status);

    alice_trades.confirm_trade(&offer.id)?;
    let outcome = bob_trades.confirm_trade(&offer.id)?;
    if let Completion::Completed(report) = &outcome.completion {
        println!(
            "offer {} completed, {} side effect failure(s)",
            report.offer.id,
            report.side_effect_failures.len()
        );
    }

    let gate = backend.rating_gate(alice.clone());
    if gate.is_unlocked(&outcome.offer) {
        if let RatingOutcome::Recorded(rating) = gate.submit(&offer.id, 5, "Great swap")? {
            println!("alice rated bob {}/5", rating.score);
        }
    }

    for book in [&dune.id, &emma.id] {
        let book = backend.catalog(alice.clone()).get(book)?;
        println!("{} is now {}", book.title, book.status);
    }
    Ok(())
}
