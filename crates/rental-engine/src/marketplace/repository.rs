use serde::{Deserialize, Serialize};

use super::domain::{
    ApprovalDecision, ApprovalState, Booking, BookingId, BookingStatus, BookingTransition,
    Conversation, ConversationId, Message, Property, PropertyId, UserId,
};
use chrono::{DateTime, Utc};

/// Result of an insert that may collide with a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted<T> {
    Created(T),
    /// A row already held the unique key; the stored row is returned untouched.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Inserted::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(value) | Inserted::Existing(value) => value,
        }
    }
}

/// Listing storage. Every mutation is a single conditional write keyed by property id.
pub trait PropertyRepository: Send + Sync {
    fn insert(&self, property: Property) -> Result<Property, RepositoryError>;
    fn fetch(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError>;
    /// Apply `decision` only while the stored approval state equals `expected`.
    /// `Ok(None)` means zero rows matched.
    fn apply_decision(
        &self,
        id: &PropertyId,
        expected: ApprovalState,
        decision: &ApprovalDecision,
    ) -> Result<Option<Property>, RepositoryError>;
    /// Owner-facing column updates; `Ok(None)` when the property does not exist.
    fn set_monthly_price(
        &self,
        id: &PropertyId,
        monthly_price: u32,
    ) -> Result<Option<Property>, RepositoryError>;
    fn set_availability(
        &self,
        id: &PropertyId,
        available: bool,
    ) -> Result<Option<Property>, RepositoryError>;
}

/// Booking storage with compare-and-set transitions.
pub trait BookingRepository: Send + Sync {
    /// Insert a booking. When it carries an idempotency key that is already taken, the
    /// booking holding that key is returned as [`Inserted::Existing`] and nothing is written.
    fn insert(&self, booking: Booking) -> Result<Inserted<Booking>, RepositoryError>;
    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, RepositoryError>;
    /// Apply `transition` only while the stored status equals `expected`.
    /// `Ok(None)` means zero rows matched.
    fn transition(
        &self,
        id: &BookingId,
        expected: BookingStatus,
        transition: &BookingTransition,
    ) -> Result<Option<Booking>, RepositoryError>;
}

/// Conversation and message storage, unique on `booking_id`.
pub trait ConversationRepository: Send + Sync {
    /// Insert-or-fetch on the booking id unique key. The opening message is only stored when
    /// the conversation is created.
    fn insert_or_fetch(
        &self,
        conversation: Conversation,
        opening: Message,
    ) -> Result<Inserted<Conversation>, RepositoryError>;
    fn fetch(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    fn find_by_booking(&self, booking_id: &BookingId)
        -> Result<Option<Conversation>, RepositoryError>;
    /// Append to an existing conversation; `NotFound` if the conversation is unknown.
    fn append(&self, message: Message) -> Result<Message, RepositoryError>;
    fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError>;
    /// Mark every unread message addressed to `reader` as read, returning how many changed.
    fn mark_read(
        &self,
        id: &ConversationId,
        reader: &UserId,
        at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle to a live client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(pub String);

/// Presence lookup used for real-time delivery (socket registry, distributed presence, ...).
pub trait PresenceDirectory: Send + Sync {
    fn lookup(&self, user: &UserId) -> Option<ConnectionHandle>;
}

/// Outbound push of a persisted message to a live connection.
pub trait NotificationFanout: Send + Sync {
    fn deliver(&self, connection: &ConnectionHandle, message: &Message)
        -> Result<(), DeliveryError>;
}

/// Delivery error raised by the fan-out transport.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection {0} is gone")]
    Disconnected(String),
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
