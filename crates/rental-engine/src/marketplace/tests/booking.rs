use std::sync::{Arc, Barrier};

use super::common::*;
use crate::marketplace::domain::{
    BookingId, BookingStatus, Principal, PropertyId, Role, SystemEvent, UserId,
};
use crate::marketplace::conversation::BindRequest;
use crate::marketplace::repository::{BookingRepository, ConversationRepository};
use crate::marketplace::MarketplaceError;

#[test]
fn create_snapshots_price_and_owner() {
    let h = harness();
    let property = h.approved_listing(500);

    let receipt = h
        .marketplace
        .bookings
        .create(&tenant(), six_month_request(&property.id))
        .expect("booking created");
    assert!(receipt.is_clean());

    let booking = receipt.value.booking;
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.monthly_price, 500);
    assert_eq!(booking.total_price, 3000);
    assert_eq!(booking.owner_id, UserId::from(OWNER));
    assert_eq!(booking.tenant_id, UserId::from(TENANT));
    assert!(!receipt.value.replayed);
    assert!(receipt.value.conversation_id.is_some());
}

#[test]
fn later_price_changes_do_not_alter_existing_bookings() {
    let h = harness();
    let booking = h.pending_booking();

    h.marketplace
        .listings
        .update_price(&booking.property_id, &owner(), 900)
        .expect("owner raises price");

    let stored = h
        .bookings
        .fetch(&booking.id)
        .expect("fetch")
        .expect("present");
    assert_eq!(stored.monthly_price, 500);
    assert_eq!(stored.total_price, 3000);
}

#[test]
fn unapproved_or_unavailable_listings_refuse_bookings() {
    let h = harness();
    let pending = h
        .marketplace
        .listings
        .register(&owner(), draft(500))
        .expect("registered");

    match h
        .marketplace
        .bookings
        .create(&other_tenant(), six_month_request(&pending.id))
    {
        Err(MarketplaceError::PropertyUnavailable(id)) => assert_eq!(id, pending.id.0),
        other => panic!("expected unavailable, got {other:?}"),
    }

    let approved = h.approved_listing(700);
    h.marketplace
        .listings
        .set_availability(&approved.id, &owner(), false)
        .expect("owner pauses listing");
    let err = h
        .marketplace
        .bookings
        .create(&tenant(), six_month_request(&approved.id))
        .unwrap_err();
    assert_eq!(err.kind(), "property_unavailable");
    assert!(h.bookings.is_empty());
}

#[test]
fn create_against_missing_property_is_not_found() {
    let h = harness();
    let err = h
        .marketplace
        .bookings
        .create(&tenant(), six_month_request(&PropertyId::from("prop-gone")))
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[test]
fn only_tenants_request_bookings() {
    let h = harness();
    let property = h.approved_listing(500);
    let err = h
        .marketplace
        .bookings
        .create(&owner(), six_month_request(&property.id))
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[test]
fn create_validates_stay() {
    let h = harness();
    let property = h.approved_listing(500);
    let mut request = six_month_request(&property.id);
    request.duration_months = 0;
    let err = h.marketplace.bookings.create(&tenant(), request).unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}

#[test]
fn idempotency_key_replays_the_original_booking() {
    let h = harness();
    let property = h.approved_listing(500);
    let mut request = six_month_request(&property.id);
    request.idempotency_key = Some("checkout-42".to_string());

    let first = h
        .marketplace
        .bookings
        .create(&tenant(), request.clone())
        .expect("first attempt");
    let retry = h
        .marketplace
        .bookings
        .create(&tenant(), request.clone())
        .expect("retry");

    assert!(!first.value.replayed);
    assert!(retry.value.replayed);
    assert_eq!(first.value.booking.id, retry.value.booking.id);
    assert_eq!(first.value.conversation_id, retry.value.conversation_id);
    assert_eq!(h.bookings.len(), 1);

    // Keys are scoped per tenant.
    let other = h
        .marketplace
        .bookings
        .create(&other_tenant(), request.clone())
        .expect("other tenant books");
    assert!(!other.value.replayed);
    assert_eq!(h.bookings.len(), 2);

    request.duration_months = 3;
    let err = h
        .marketplace
        .bookings
        .create(&tenant(), request)
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}

#[test]
fn replay_survives_listing_going_unavailable() {
    let h = harness();
    let property = h.approved_listing(500);
    let mut request = six_month_request(&property.id);
    request.idempotency_key = Some("checkout-43".to_string());

    let first = h
        .marketplace
        .bookings
        .create(&tenant(), request.clone())
        .expect("first attempt");
    h.marketplace
        .listings
        .set_availability(&property.id, &owner(), false)
        .expect("owner pauses listing");

    let retry = h
        .marketplace
        .bookings
        .create(&tenant(), request)
        .expect("retry still replays");
    assert!(retry.value.replayed);
    assert_eq!(retry.value.booking.id, first.value.booking.id);
}

#[test]
fn owner_confirms_and_tenant_is_told() {
    let h = harness();
    let booking = h.pending_booking();
    let connection = connect(&h, TENANT);

    let outcome = h
        .marketplace
        .bookings
        .confirm(&booking.id, &owner())
        .expect("owner confirms");

    assert!(outcome.is_clean());
    assert_eq!(outcome.value.status, BookingStatus::Confirmed);
    assert!(outcome.value.confirmed_at.is_some());

    let (_, messages) = h.thread(&booking.id);
    let last = messages.last().expect("system message posted");
    assert!(last.is_system_generated);
    assert!(!last.is_read);
    assert!(last.sender_id.is_none());
    assert_eq!(last.receiver_id, UserId::from(TENANT));
    assert_eq!(last.event, Some(SystemEvent::BookingConfirmed));
    assert!(last.body.contains("confirmed"));

    let deliveries = h.fanout.deliveries();
    assert_eq!(deliveries.len(), 1, "only the connected tenant gets a push");
    assert_eq!(deliveries[0].0, connection);
    assert_eq!(deliveries[0].1.id, last.id);
}

#[test]
fn tenant_can_never_confirm() {
    let h = harness();
    let booking = h.pending_booking();

    for status_change in [false, true] {
        if status_change {
            h.marketplace
                .bookings
                .confirm(&booking.id, &owner())
                .expect("owner confirms");
        }
        match h.marketplace.bookings.confirm(&booking.id, &tenant()) {
            Err(MarketplaceError::Forbidden(_)) => {}
            other => panic!("expected forbidden, got {other:?}"),
        }
    }
}

#[test]
fn refuse_records_reason_and_notifies_tenant() {
    let h = harness();
    let booking = h.pending_booking();

    let outcome = h
        .marketplace
        .bookings
        .refuse(&booking.id, &owner(), Some("too late"))
        .expect("owner refuses");
    assert_eq!(outcome.value.status, BookingStatus::Refused);
    assert_eq!(outcome.value.decision_reason.as_deref(), Some("too late"));

    let (_, messages) = h.thread(&booking.id);
    let last = messages.last().expect("system message");
    assert_eq!(last.event, Some(SystemEvent::BookingRefused));
    assert!(last.body.contains("too late"));
}

#[test]
fn refuse_without_reason_uses_default_but_blank_is_rejected() {
    let h = harness();
    let booking = h.pending_booking();

    let err = h
        .marketplace
        .bookings
        .refuse(&booking.id, &owner(), Some("   "))
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");

    let outcome = h
        .marketplace
        .bookings
        .refuse(&booking.id, &owner(), None)
        .expect("refused with default reason");
    assert_eq!(
        outcome.value.decision_reason.as_deref(),
        Some("The owner declined this booking request.")
    );
}

#[test]
fn tenant_cancels_only_while_pending() {
    let h = harness();
    let booking = h.pending_booking();

    let err = h
        .marketplace
        .bookings
        .cancel(&booking.id, &owner())
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");

    let outcome = h
        .marketplace
        .bookings
        .cancel(&booking.id, &tenant())
        .expect("tenant cancels");
    assert_eq!(outcome.value.status, BookingStatus::Cancelled);

    match h.marketplace.bookings.cancel(&booking.id, &tenant()) {
        Err(MarketplaceError::InvalidTransition { from, action }) => {
            assert_eq!(from, "cancelled");
            assert_eq!(action, "cancel");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn decided_bookings_cannot_be_decided_again() {
    let h = harness();
    let booking = h.pending_booking();
    h.marketplace
        .bookings
        .confirm(&booking.id, &owner())
        .expect("confirmed");

    let err = h
        .marketplace
        .bookings
        .refuse(&booking.id, &owner(), Some("changed my mind"))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
}

#[test]
fn concurrent_confirm_and_refuse_never_both_succeed() {
    for _ in 0..16 {
        let h = harness();
        let booking = h.pending_booking();
        let barrier = Arc::new(Barrier::new(2));

        let (confirm, refuse) = std::thread::scope(|scope| {
            let confirm = scope.spawn(|| {
                barrier.wait();
                h.marketplace.bookings.confirm(&booking.id, &owner())
            });
            let refuse = scope.spawn(|| {
                barrier.wait();
                h.marketplace
                    .bookings
                    .refuse(&booking.id, &owner(), Some("too late"))
            });
            (
                confirm.join().expect("confirm thread"),
                refuse.join().expect("refuse thread"),
            )
        });

        let successes = [confirm.is_ok(), refuse.is_ok()]
            .into_iter()
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);

        let loser = confirm.err().or(refuse.err()).expect("one call lost");
        assert!(matches!(
            loser,
            MarketplaceError::InvalidTransition { .. }
                | MarketplaceError::ConcurrentModification { .. }
        ));

        let stored = h
            .bookings
            .fetch(&booking.id)
            .expect("fetch")
            .expect("present");
        assert!(matches!(
            stored.status,
            BookingStatus::Confirmed | BookingStatus::Refused
        ));
    }
}

#[test]
fn scheduler_moves_confirmed_bookings_through_stay() {
    let h = harness();
    let booking = h.pending_booking();

    let err = h
        .marketplace
        .bookings
        .activate(&booking.id, &admin())
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");

    h.marketplace
        .bookings
        .confirm(&booking.id, &owner())
        .expect("confirmed");
    let err = h
        .marketplace
        .bookings
        .activate(&booking.id, &owner())
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");

    let active = h
        .marketplace
        .bookings
        .activate(&booking.id, &admin())
        .expect("activated");
    assert_eq!(active.status, BookingStatus::Active);
    let completed = h
        .marketplace
        .bookings
        .complete(&booking.id, &admin())
        .expect("completed");
    assert_eq!(completed.status, BookingStatus::Completed);
    assert!(completed.status.is_terminal());
}

#[test]
fn bookings_are_visible_to_parties_only() {
    let h = harness();
    let booking = h.pending_booking();

    assert!(h.marketplace.bookings.get(&booking.id, &tenant()).is_ok());
    assert!(h.marketplace.bookings.get(&booking.id, &owner()).is_ok());
    assert!(h.marketplace.bookings.get(&booking.id, &admin()).is_ok());
    let stranger = Principal::new("owner-9", Role::Owner);
    let err = h
        .marketplace
        .bookings
        .get(&booking.id, &stranger)
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");

    let err = h
        .marketplace
        .bookings
        .get(&BookingId::from("bkg-missing"), &admin())
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[test]
fn failed_push_is_a_warning_not_a_rollback() {
    let h = harness_with_fanout(Arc::new(BrokenFanout));
    let booking = h.pending_booking();
    connect(&h, TENANT);

    let outcome = h
        .marketplace
        .bookings
        .confirm(&booking.id, &owner())
        .expect("transition still commits");

    assert_eq!(outcome.value.status, BookingStatus::Confirmed);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].kind, "notification_delivery_failed");

    let stored = h
        .bookings
        .fetch(&booking.id)
        .expect("fetch")
        .expect("present");
    assert_eq!(stored.status, BookingStatus::Confirmed);
    let (_, messages) = h.thread(&booking.id);
    assert_eq!(
        messages.last().and_then(|message| message.event),
        Some(SystemEvent::BookingConfirmed),
        "message is persisted for later retrieval"
    );
}

#[test]
fn conversation_store_outage_does_not_block_bookings() {
    let h = harness_with_conversations(Arc::new(UnavailableConversations));
    let property = h.approved_listing(500);

    let receipt = h
        .marketplace
        .bookings
        .create(&tenant(), six_month_request(&property.id))
        .expect("booking committed");
    assert_eq!(receipt.value.booking.status, BookingStatus::Pending);
    assert!(receipt.value.conversation_id.is_none());
    assert!(!receipt.is_clean());

    let confirmed = h
        .marketplace
        .bookings
        .confirm(&receipt.value.booking.id, &owner())
        .expect("confirm committed");
    assert_eq!(confirmed.value.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.warnings.len(), 1);
}

#[test]
fn concurrent_confirm_and_cancel_never_both_succeed() {
    for _ in 0..16 {
        let h = harness();
        let booking = h.pending_booking();
        let barrier = Arc::new(Barrier::new(2));

        let (confirm, cancel) = std::thread::scope(|scope| {
            let confirm = scope.spawn(|| {
                barrier.wait();
                h.marketplace.bookings.confirm(&booking.id, &owner())
            });
            let cancel = scope.spawn(|| {
                barrier.wait();
                h.marketplace.bookings.cancel(&booking.id, &tenant())
            });
            (
                confirm.join().expect("confirm thread"),
                cancel.join().expect("cancel thread"),
            )
        });

        assert_ne!(confirm.is_ok(), cancel.is_ok());
        let loser = confirm.err().or(cancel.err()).expect("one call lost");
        assert!(matches!(
            loser,
            MarketplaceError::InvalidTransition { .. }
                | MarketplaceError::ConcurrentModification { .. }
        ));

        let stored = h
            .bookings
            .fetch(&booking.id)
            .expect("store available")
            .expect("booking present");
        assert!(matches!(
            stored.status,
            BookingStatus::Confirmed | BookingStatus::Cancelled
        ));
    }
}

#[test]
fn outsiders_are_forbidden_before_reason_is_checked() {
    let h = harness();
    let booking = h.pending_booking();
    let stranger = Principal::new("owner-2", Role::Owner);

    match h.marketplace.bookings.refuse(&booking.id, &stranger, Some("  ")) {
        Err(MarketplaceError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
}

#[test]
fn replay_reports_conversation_lookup_failure() {
    let h = harness_with_conversations(Arc::new(UnavailableConversations));
    let property = h.approved_listing(500);
    let mut request = six_month_request(&property.id);
    request.idempotency_key = Some("checkout-44".to_string());

    h.marketplace
        .bookings
        .create(&tenant(), request.clone())
        .expect("first attempt commits");
    let retry = h
        .marketplace
        .bookings
        .create(&tenant(), request)
        .expect("retry replays");

    assert!(retry.value.replayed);
    assert!(retry.value.conversation_id.is_none());
    assert_eq!(retry.warnings.len(), 1);
    assert_eq!(retry.warnings[0].kind, "notification_delivery_failed");
}

#[test]
fn idempotency_key_reused_with_another_agent_is_rejected() {
    let h = harness();
    let property = h.approved_listing(500);
    let mut request = six_month_request(&property.id);
    request.idempotency_key = Some("checkout-45".to_string());
    request.agent_id = Some(UserId::from("agent-1"));

    h.marketplace
        .bookings
        .create(&tenant(), request.clone())
        .expect("first attempt");

    request.agent_id = Some(UserId::from("agent-2"));
    let err = h
        .marketplace
        .bookings
        .create(&tenant(), request)
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(h.bookings.len(), 1);
}

#[test]
fn disconnected_tenant_gets_no_push() {
    let h = harness();
    let booking = h.pending_booking();
    connect(&h, TENANT);
    h.presence.disconnect(&UserId::from(TENANT));

    let outcome = h
        .marketplace
        .bookings
        .confirm(&booking.id, &owner())
        .expect("owner confirms");

    assert!(outcome.is_clean());
    assert!(h.fanout.deliveries().is_empty());
    let (_, messages) = h.thread(&booking.id);
    let last = messages.last().expect("message persisted");
    assert_eq!(last.event, Some(SystemEvent::BookingConfirmed));
    assert!(!last.is_read);
}

#[test]
fn thread_prebound_by_an_outsider_never_receives_booking_messages() {
    let h = harness();
    let booking_id = BookingId::from("bkg-prebound");
    let hijack = BindRequest {
        booking_id: booking_id.clone(),
        tenant_id: UserId::from(OTHER_TENANT),
        owner_id: UserId::from(OWNER),
        property_id: PropertyId::from("prop-elsewhere"),
    };
    let planted = h
        .marketplace
        .conversations
        .find_or_create_for_booking(&hijack)
        .expect("thread bound ahead of the booking")
        .value
        .conversation;

    let mut booking = h.pending_booking();
    booking.id = booking_id.clone();
    h.bookings.insert(booking).expect("booking stored");

    let outcome = h
        .marketplace
        .bookings
        .confirm(&booking_id, &owner())
        .expect("confirm commits");
    assert_eq!(outcome.value.status, BookingStatus::Confirmed);
    assert_eq!(outcome.warnings.len(), 1);

    let messages = h
        .conversations
        .messages(&planted.id)
        .expect("store available");
    assert_eq!(messages.len(), 1, "only the opening message: {messages:?}");
    assert_eq!(messages[0].event, Some(SystemEvent::ConversationOpened));
}
