use crate::infra::in_memory_backends;
use chrono::{Months, NaiveDate};
use clap::Args;
use rental_engine::config::MarketplaceConfig;
use rental_engine::error::AppError;
use rental_engine::marketplace::{
    BookingRequest, ConnectionHandle, ListingDraft, Marketplace, Message, Principal, Role, UserId,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Monthly price of the demo listing.
    #[arg(long, default_value_t = 500)]
    pub(crate) monthly_price: u32,
    /// Length of the requested stay in months.
    #[arg(long, default_value_t = 6)]
    pub(crate) months: u32,
    /// First night of the stay (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date, default_value = "2025-01-01")]
    pub(crate) start_date: NaiveDate,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        monthly_price,
        months,
        start_date,
    } = args;
    let end_date = start_date
        .checked_add_months(Months::new(months))
        .unwrap_or(start_date);

    let backends = in_memory_backends();
    let presence = backends.presence.clone();
    let fanout = backends.fanout.clone();
    let marketplace = Arc::new(Marketplace::new(
        backends.stores,
        MarketplaceConfig::default(),
    ));

    let admin = Principal::new("admin-demo", Role::Admin);
    let owner = Principal::new("owner-demo", Role::Owner);
    let tenant = Principal::new("tenant-demo", Role::Tenant);
    let late_tenant = Principal::new("tenant-late", Role::Tenant);

    println!("Listing moderation");
    let listing = marketplace.listings.register(
        &owner,
        ListingDraft {
            title: "Two bedroom by the river".to_string(),
            city: "Toulouse".to_string(),
            monthly_price,
        },
    )?;
    println!(
        "- {} registered by {} -> {}",
        listing.id,
        listing.owner_id,
        listing.approval_state.label()
    );
    let listing = marketplace.approvals.approve(&listing.id, &admin)?;
    println!(
        "- {} approved by {}",
        listing.id,
        listing
            .approved_by
            .as_ref()
            .map(UserId::as_str)
            .unwrap_or("-")
    );

    let drafted = marketplace.listings.register(
        &owner,
        ListingDraft {
            title: "Attic studio".to_string(),
            city: "Toulouse".to_string(),
            monthly_price: monthly_price / 2 + 1,
        },
    )?;
    let rejected = marketplace
        .approvals
        .reject(&drafted.id, &admin, "missing photos")?;
    println!(
        "- {} rejected ({}), active={}",
        rejected.id,
        rejected.rejection_reason.as_deref().unwrap_or("-"),
        rejected.is_active
    );

    println!("\nBooking decisions");
    let request = |property_id| BookingRequest {
        property_id,
        start_date,
        end_date,
        duration_months: months,
        agent_id: None,
        idempotency_key: None,
    };

    match marketplace
        .bookings
        .create(&late_tenant, request(drafted.id.clone()))
    {
        Ok(_) => println!("- unexpected: booking accepted on a rejected listing"),
        Err(err) => println!("- booking on {} refused: {}", drafted.id, err),
    }

    presence.connect(
        tenant.user_id.clone(),
        ConnectionHandle("ws-tenant-demo".to_string()),
    );
    let receipt = marketplace
        .bookings
        .create(&tenant, request(listing.id.clone()))?;
    let booking = receipt.value.booking;
    println!(
        "- {} requested {} -> {} ({} months, {} total) -> {}",
        booking.id,
        booking.start_date,
        booking.end_date,
        booking.duration_months,
        booking.total_price,
        booking.status.label()
    );

    let confirmed = marketplace.bookings.confirm(&booking.id, &owner)?;
    println!(
        "- {} confirmed by {} -> {}",
        confirmed.value.id,
        owner.user_id,
        confirmed.value.status.label()
    );
    for warning in &confirmed.warnings {
        println!("  warning: {}", warning.detail);
    }
    if let Err(err) = marketplace
        .bookings
        .refuse(&booking.id, &owner, Some("too late"))
    {
        println!("- late refusal rejected: {}", err);
    }

    let Some(conversation) = marketplace.conversations.for_booking(&booking.id)? else {
        println!("\nNo conversation bound to {}", booking.id);
        return Ok(());
    };
    println!("\nConversation {}", conversation.id);
    for message in marketplace.conversations.messages(&conversation.id, &tenant)? {
        print_message(&message);
    }

    println!("\nReal-time pushes");
    for (connection, message) in fanout.deliveries() {
        println!("- {} <- {}", connection.0, message.id);
    }

    Ok(())
}

fn print_message(message: &Message) {
    println!(
        "- [{}] to {}: {}",
        message
            .event
            .map(|event| format!("{event:?}"))
            .unwrap_or_else(|| "message".to_string()),
        message.receiver_id,
        message.body
    );
}
