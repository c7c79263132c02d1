//! Mutex-backed stores honoring the same conditional-update contracts a SQL backend would
//! (`UPDATE ... WHERE id = ? AND status = ?`, unique indexes on booking id and idempotency key).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    ApprovalDecision, ApprovalState, Booking, BookingId, BookingStatus, BookingTransition,
    Conversation, ConversationId, Message, Property, PropertyId, UserId,
};
use super::repository::{
    BookingRepository, ConnectionHandle, ConversationRepository, DeliveryError, Inserted,
    NotificationFanout, PresenceDirectory, PropertyRepository, RepositoryError,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
}

#[derive(Default, Clone)]
pub struct InMemoryPropertyRepository {
    records: Arc<Mutex<HashMap<PropertyId, Property>>>,
}

impl InMemoryPropertyRepository {
    fn modify(
        &self,
        id: &PropertyId,
        change: impl FnOnce(&mut Property),
    ) -> Result<Option<Property>, RepositoryError> {
        let mut guard = lock(&self.records)?;
        Ok(guard.get_mut(id).map(|property| {
            change(property);
            property.clone()
        }))
    }
}

impl PropertyRepository for InMemoryPropertyRepository {
    fn insert(&self, property: Property) -> Result<Property, RepositoryError> {
        let mut guard = lock(&self.records)?;
        if guard.contains_key(&property.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(property.id.clone(), property.clone());
        Ok(property)
    }

    fn fetch(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError> {
        let guard = lock(&self.records)?;
        Ok(guard.get(id).cloned())
    }

    fn apply_decision(
        &self,
        id: &PropertyId,
        expected: ApprovalState,
        decision: &ApprovalDecision,
    ) -> Result<Option<Property>, RepositoryError> {
        let mut guard = lock(&self.records)?;
        match guard.get_mut(id) {
            Some(property) if property.approval_state == expected => {
                decision.apply_to(property);
                Ok(Some(property.clone()))
            }
            _ => Ok(None),
        }
    }

    fn set_monthly_price(
        &self,
        id: &PropertyId,
        monthly_price: u32,
    ) -> Result<Option<Property>, RepositoryError> {
        self.modify(id, |property| property.monthly_price = monthly_price)
    }

    fn set_availability(
        &self,
        id: &PropertyId,
        available: bool,
    ) -> Result<Option<Property>, RepositoryError> {
        self.modify(id, |property| property.is_available = available)
    }
}

#[derive(Default)]
struct BookingTables {
    rows: HashMap<BookingId, Booking>,
    idempotency: HashMap<String, BookingId>,
}

#[derive(Default, Clone)]
pub struct InMemoryBookingRepository {
    tables: Arc<Mutex<BookingTables>>,
}

impl InMemoryBookingRepository {
    pub fn len(&self) -> usize {
        self.tables.lock().map(|tables| tables.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn insert(&self, booking: Booking) -> Result<Inserted<Booking>, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        if let Some(key) = &booking.idempotency_key {
            if let Some(existing) = tables.idempotency.get(key) {
                let stored = tables
                    .rows
                    .get(existing)
                    .cloned()
                    .ok_or(RepositoryError::NotFound)?;
                return Ok(Inserted::Existing(stored));
            }
        }
        if tables.rows.contains_key(&booking.id) {
            return Err(RepositoryError::Conflict);
        }
        if let Some(key) = &booking.idempotency_key {
            tables.idempotency.insert(key.clone(), booking.id.clone());
        }
        tables.rows.insert(booking.id.clone(), booking.clone());
        Ok(Inserted::Created(booking))
    }

    fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let tables = lock(&self.tables)?;
        Ok(tables.rows.get(id).cloned())
    }

    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, RepositoryError> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .idempotency
            .get(key)
            .and_then(|id| tables.rows.get(id))
            .cloned())
    }

    fn transition(
        &self,
        id: &BookingId,
        expected: BookingStatus,
        transition: &BookingTransition,
    ) -> Result<Option<Booking>, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        match tables.rows.get_mut(id) {
            Some(booking) if booking.status == expected => {
                transition.apply_to(booking);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
struct ConversationTables {
    conversations: HashMap<ConversationId, Conversation>,
    by_booking: HashMap<BookingId, ConversationId>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

#[derive(Default, Clone)]
pub struct InMemoryConversationRepository {
    tables: Arc<Mutex<ConversationTables>>,
}

impl InMemoryConversationRepository {
    pub fn conversation_count(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.conversations.len())
            .unwrap_or(0)
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn insert_or_fetch(
        &self,
        conversation: Conversation,
        opening: Message,
    ) -> Result<Inserted<Conversation>, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        if let Some(booking_id) = &conversation.booking_id {
            if let Some(existing) = tables.by_booking.get(booking_id) {
                let stored = tables
                    .conversations
                    .get(existing)
                    .cloned()
                    .ok_or(RepositoryError::NotFound)?;
                return Ok(Inserted::Existing(stored));
            }
        }
        if tables.conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict);
        }
        if let Some(booking_id) = &conversation.booking_id {
            tables
                .by_booking
                .insert(booking_id.clone(), conversation.id.clone());
        }
        tables
            .messages
            .insert(conversation.id.clone(), vec![opening]);
        tables
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(Inserted::Created(conversation))
    }

    fn fetch(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let tables = lock(&self.tables)?;
        Ok(tables.conversations.get(id).cloned())
    }

    fn find_by_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .by_booking
            .get(booking_id)
            .and_then(|id| tables.conversations.get(id))
            .cloned())
    }

    fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let thread = tables
            .messages
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        thread.push(message.clone());
        Ok(message)
    }

    fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        let tables = lock(&self.tables)?;
        tables
            .messages
            .get(id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    fn mark_read(
        &self,
        id: &ConversationId,
        reader: &UserId,
        at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut tables = lock(&self.tables)?;
        let thread = tables.messages.get_mut(id).ok_or(RepositoryError::NotFound)?;
        let mut changed = 0;
        for message in thread
            .iter_mut()
            .filter(|message| &message.receiver_id == reader && !message.is_read)
        {
            message.is_read = true;
            message.read_at = Some(at);
            changed += 1;
        }
        Ok(changed)
    }
}

/// Presence table for a single process. Swap for a shared store when running several nodes.
#[derive(Default, Clone)]
pub struct InMemoryPresence {
    connections: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl InMemoryPresence {
    pub fn connect(&self, user: UserId, connection: ConnectionHandle) {
        if let Ok(mut guard) = self.connections.lock() {
            guard.insert(user, connection);
        }
    }

    pub fn disconnect(&self, user: &UserId) {
        if let Ok(mut guard) = self.connections.lock() {
            guard.remove(user);
        }
    }
}

impl PresenceDirectory for InMemoryPresence {
    fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.connections
            .lock()
            .ok()
            .and_then(|guard| guard.get(user).cloned())
    }
}

/// Fan-out that records what it was asked to push. Used by the API binary and tests.
#[derive(Default, Clone)]
pub struct RecordingFanout {
    deliveries: Arc<Mutex<Vec<(ConnectionHandle, Message)>>>,
}

impl RecordingFanout {
    pub fn deliveries(&self) -> Vec<(ConnectionHandle, Message)> {
        self.deliveries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl NotificationFanout for RecordingFanout {
    fn deliver(
        &self,
        connection: &ConnectionHandle,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        self.deliveries
            .lock()
            .map_err(|_| DeliveryError::Transport("fan-out mutex poisoned".to_string()))?
            .push((connection.clone(), message.clone()));
        Ok(())
    }
}
