use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::config::MarketplaceConfig;
use crate::marketplace::domain::{
    Booking, BookingId, BookingRequest, Conversation, ConversationId, ListingDraft, Message,
    Principal, Property, PropertyId, Role, UserId,
};
use crate::marketplace::memory::{
    InMemoryBookingRepository, InMemoryConversationRepository, InMemoryPresence,
    InMemoryPropertyRepository, RecordingFanout,
};
use crate::marketplace::repository::{
    ConnectionHandle, ConversationRepository, DeliveryError, Inserted, NotificationFanout,
    RepositoryError,
};
use crate::marketplace::{Marketplace, MarketplaceStores};

pub(super) const ADMIN: &str = "admin-1";
pub(super) const OWNER: &str = "owner-1";
pub(super) const TENANT: &str = "tenant-1";
pub(super) const OTHER_TENANT: &str = "tenant-2";

pub(super) fn admin() -> Principal {
    Principal::new(ADMIN, Role::Admin)
}

pub(super) fn owner() -> Principal {
    Principal::new(OWNER, Role::Owner)
}

pub(super) fn tenant() -> Principal {
    Principal::new(TENANT, Role::Tenant)
}

pub(super) fn other_tenant() -> Principal {
    Principal::new(OTHER_TENANT, Role::Tenant)
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn draft(monthly_price: u32) -> ListingDraft {
    ListingDraft {
        title: "Canal-side two bedroom".to_string(),
        city: "Lyon".to_string(),
        monthly_price,
    }
}

pub(super) fn six_month_request(property_id: &PropertyId) -> BookingRequest {
    BookingRequest {
        property_id: property_id.clone(),
        start_date: date(2025, 1, 1),
        end_date: date(2025, 7, 1),
        duration_months: 6,
        agent_id: None,
        idempotency_key: None,
    }
}

pub(super) struct Harness {
    pub(super) marketplace: Arc<Marketplace>,
    pub(super) properties: Arc<InMemoryPropertyRepository>,
    pub(super) bookings: Arc<InMemoryBookingRepository>,
    pub(super) conversations: Arc<InMemoryConversationRepository>,
    pub(super) presence: Arc<InMemoryPresence>,
    pub(super) fanout: Arc<RecordingFanout>,
}

impl Harness {
    pub(super) fn approved_listing(&self, monthly_price: u32) -> Property {
        let property = self
            .marketplace
            .listings
            .register(&owner(), draft(monthly_price))
            .expect("owner registers listing");
        self.marketplace
            .approvals
            .approve(&property.id, &admin())
            .expect("admin approves listing")
    }

    pub(super) fn pending_booking(&self) -> Booking {
        let property = self.approved_listing(500);
        self.marketplace
            .bookings
            .create(&tenant(), six_month_request(&property.id))
            .expect("tenant books approved listing")
            .value
            .booking
    }

    pub(super) fn thread(&self, booking_id: &BookingId) -> (Conversation, Vec<Message>) {
        let conversation = self
            .conversations
            .find_by_booking(booking_id)
            .expect("store available")
            .expect("conversation bound");
        let messages = self
            .conversations
            .messages(&conversation.id)
            .expect("messages present");
        (conversation, messages)
    }
}

pub(super) fn harness() -> Harness {
    build_harness(None, None)
}

pub(super) fn harness_with_fanout(fanout: Arc<dyn NotificationFanout>) -> Harness {
    build_harness(None, Some(fanout))
}

pub(super) fn harness_with_conversations(
    conversations: Arc<dyn ConversationRepository>,
) -> Harness {
    build_harness(Some(conversations), None)
}

fn build_harness(
    conversation_override: Option<Arc<dyn ConversationRepository>>,
    fanout_override: Option<Arc<dyn NotificationFanout>>,
) -> Harness {
    let properties = Arc::new(InMemoryPropertyRepository::default());
    let bookings = Arc::new(InMemoryBookingRepository::default());
    let conversations = Arc::new(InMemoryConversationRepository::default());
    let presence = Arc::new(InMemoryPresence::default());
    let fanout = Arc::new(RecordingFanout::default());

    let default_conversations: Arc<dyn ConversationRepository> = conversations.clone();
    let default_fanout: Arc<dyn NotificationFanout> = fanout.clone();
    let stores = MarketplaceStores {
        properties: properties.clone(),
        bookings: bookings.clone(),
        conversations: conversation_override.unwrap_or(default_conversations),
        presence: presence.clone(),
        fanout: fanout_override.unwrap_or(default_fanout),
    };

    Harness {
        marketplace: Arc::new(Marketplace::new(stores, MarketplaceConfig::default())),
        properties,
        bookings,
        conversations,
        presence,
        fanout,
    }
}

pub(super) fn connect(harness: &Harness, user: &str) -> ConnectionHandle {
    let handle = ConnectionHandle(format!("socket-{user}"));
    harness
        .presence
        .connect(UserId::from(user), handle.clone());
    handle
}

/// Fan-out whose transport is always down.
pub(super) struct BrokenFanout;

impl NotificationFanout for BrokenFanout {
    fn deliver(
        &self,
        connection: &ConnectionHandle,
        _message: &Message,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::Disconnected(connection.0.clone()))
    }
}

/// Conversation store that is down for every call.
pub(super) struct UnavailableConversations;

impl ConversationRepository for UnavailableConversations {
    fn insert_or_fetch(
        &self,
        _conversation: Conversation,
        _opening: Message,
    ) -> Result<Inserted<Conversation>, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }

    fn fetch(&self, _id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }

    fn find_by_booking(
        &self,
        _booking_id: &BookingId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }

    fn append(&self, _message: Message) -> Result<Message, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }

    fn messages(&self, _id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }

    fn mark_read(
        &self,
        _id: &ConversationId,
        _reader: &UserId,
        _at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        Err(RepositoryError::Unavailable("chat database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
