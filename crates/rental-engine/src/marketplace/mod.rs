//! Listing approval and booking lifecycle engine.
//!
//! Two small state machines (listing moderation, booking reservation) guarded by role and
//! ownership checks, plus the binder that ties each booking to exactly one conversation and
//! narrates its transitions as system messages.

pub mod approval;
pub mod booking;
pub mod conversation;
pub mod domain;
pub mod error;
pub(crate) mod guard;
pub mod listing;
pub mod memory;
pub mod outcome;
pub mod repository;
pub mod router;
pub mod seed;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::config::MarketplaceConfig;

pub use approval::ApprovalService;
pub use booking::{BookingReceipt, BookingService};
pub use conversation::{BindRequest, Binding, ConversationBinder};
pub use domain::{
    ApprovalState, Booking, BookingId, BookingRequest, BookingStatus, Conversation,
    ConversationId, ListingDraft, Message, Principal, Property, PropertyId, Role, SystemEvent,
    UserId,
};
pub use error::MarketplaceError;
pub use listing::ListingService;
pub use memory::{
    InMemoryBookingRepository, InMemoryConversationRepository, InMemoryPresence,
    InMemoryPropertyRepository, RecordingFanout,
};
pub use outcome::{Outcome, Warning};
pub use repository::{
    BookingRepository, ConnectionHandle, ConversationRepository, DeliveryError,
    NotificationFanout, PresenceDirectory, PropertyRepository, RepositoryError,
};
pub use router::marketplace_router;
pub use seed::{PropertySeedImporter, SeedImportError};

/// Storage and delivery adapters the engine runs against.
#[derive(Clone)]
pub struct MarketplaceStores {
    pub properties: Arc<dyn PropertyRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub presence: Arc<dyn PresenceDirectory>,
    pub fanout: Arc<dyn NotificationFanout>,
}

/// Facade composing the listing, approval, booking and conversation services.
pub struct Marketplace {
    pub listings: ListingService,
    pub approvals: ApprovalService,
    pub bookings: BookingService,
    pub conversations: Arc<ConversationBinder>,
}

impl Marketplace {
    pub fn new(stores: MarketplaceStores, config: MarketplaceConfig) -> Self {
        let binder = Arc::new(ConversationBinder::new(
            stores.conversations,
            stores.presence,
            stores.fanout,
        ));

        Self {
            listings: ListingService::new(stores.properties.clone()),
            approvals: ApprovalService::new(stores.properties.clone()),
            bookings: BookingService::new(
                stores.properties,
                stores.bookings,
                binder.clone(),
                config,
            ),
            conversations: binder,
        }
    }
}
