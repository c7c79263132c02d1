use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{
    Booking, BookingId, Conversation, ConversationId, Message, MessageId, Principal, PropertyId, Role,
    SystemEvent, UserId,
};
use super::error::MarketplaceError;
use super::guard::required_text;
use super::outcome::{Outcome, Warning};
use super::repository::{
    ConversationRepository, Inserted, NotificationFanout, PresenceDirectory, RepositoryError,
};

static CONVERSATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_conversation_id() -> ConversationId {
    let id = CONVERSATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ConversationId(format!("conv-{id:06}"))
}

fn next_message_id() -> MessageId {
    let id = MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    MessageId(format!("msg-{id:06}"))
}

/// Identifiers needed to bind a booking to its conversation. Missing fields deserialize as
/// empty ids and are rejected by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindRequest {
    pub booking_id: BookingId,
    pub tenant_id: UserId,
    pub owner_id: UserId,
    pub property_id: PropertyId,
}

impl BindRequest {
    /// Parties and property exactly as recorded on the booking.
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id.clone(),
            tenant_id: booking.tenant_id.clone(),
            owner_id: booking.owner_id.clone(),
            property_id: booking.property_id.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), MarketplaceError> {
        required_text("booking_id", self.booking_id.as_str())?;
        required_text("tenant_id", self.tenant_id.as_str())?;
        required_text("owner_id", self.owner_id.as_str())?;
        required_text("property_id", self.property_id.as_str())?;
        Ok(())
    }

    /// Field that disagrees with `booking`, if any.
    pub(crate) fn mismatch_with(&self, booking: &Booking) -> Option<&'static str> {
        if self.tenant_id != booking.tenant_id {
            Some("tenant_id")
        } else if self.owner_id != booking.owner_id {
            Some("owner_id")
        } else if self.property_id != booking.property_id {
            Some("property_id")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub conversation: Conversation,
    pub created: bool,
}

// A stored thread must name the same parties and property as the booking it is bound to.
fn ensure_bound_to(
    conversation: &Conversation,
    request: &BindRequest,
) -> Result<(), MarketplaceError> {
    if conversation.tenant_id == request.tenant_id
        && conversation.owner_id == request.owner_id
        && conversation.property_id == request.property_id
    {
        return Ok(());
    }
    warn!(
        conversation_id = %conversation.id,
        booking_id = %request.booking_id,
        "conversation participants disagree with the booking"
    );
    Err(MarketplaceError::Validation(format!(
        "conversation {} is bound to different participants than booking {}",
        conversation.id, request.booking_id
    )))
}

/// Keeps exactly one conversation per booking and narrates booking transitions into it.
pub struct ConversationBinder {
    conversations: Arc<dyn ConversationRepository>,
    presence: Arc<dyn PresenceDirectory>,
    fanout: Arc<dyn NotificationFanout>,
}

impl ConversationBinder {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        presence: Arc<dyn PresenceDirectory>,
        fanout: Arc<dyn NotificationFanout>,
    ) -> Self {
        Self {
            conversations,
            presence,
            fanout,
        }
    }

    /// Return the booking's conversation, creating it with an opening system message if absent.
    ///
    /// Creation goes through the store's unique key on `booking_id`, so concurrent retries for
    /// the same booking converge on one thread and only one of them reports `created`.
    pub fn find_or_create_for_booking(
        &self,
        request: &BindRequest,
    ) -> Result<Outcome<Binding>, MarketplaceError> {
        request.validate()?;

        if let Some(existing) = self.conversations.find_by_booking(&request.booking_id)? {
            ensure_bound_to(&existing, request)?;
            return Ok(Outcome::clean(Binding {
                conversation: existing,
                created: false,
            }));
        }

        let now = Utc::now();
        let conversation_id = next_conversation_id();
        let conversation = Conversation {
            id: conversation_id.clone(),
            booking_id: Some(request.booking_id.clone()),
            property_id: request.property_id.clone(),
            tenant_id: request.tenant_id.clone(),
            owner_id: request.owner_id.clone(),
            created_at: now,
        };
        let opening = Message::system(
            MessageId(conversation_id.0.clone()),
            conversation_id,
            request.owner_id.clone(),
            SystemEvent::ConversationOpened,
            format!(
                "Conversation opened for booking {} on property {}.",
                request.booking_id, request.property_id
            ),
            now,
        );

        match self
            .conversations
            .insert_or_fetch(conversation, opening.clone())?
        {
            Inserted::Created(conversation) => {
                info!(
                    conversation_id = %conversation.id,
                    booking_id = %request.booking_id,
                    "conversation bound to booking"
                );
                let warnings = self.deliver(&opening);
                Ok(Outcome {
                    value: Binding {
                        conversation,
                        created: true,
                    },
                    warnings,
                })
            }
            Inserted::Existing(conversation) => {
                ensure_bound_to(&conversation, request)?;
                debug!(
                    conversation_id = %conversation.id,
                    booking_id = %request.booking_id,
                    "conversation already bound by a concurrent request"
                );
                Ok(Outcome::clean(Binding {
                    conversation,
                    created: false,
                }))
            }
        }
    }

    /// Append a system notice addressed to the conversation's tenant.
    pub fn post_system_message(
        &self,
        id: &ConversationId,
        body: &str,
    ) -> Result<Outcome<Message>, MarketplaceError> {
        let conversation = self.fetch(id)?;
        let receiver = conversation.tenant_id.clone();
        self.notify(&conversation, &receiver, SystemEvent::Notice, body)
    }

    /// Persist a system message to `receiver` and push it if they are connected.
    pub(crate) fn notify(
        &self,
        conversation: &Conversation,
        receiver: &UserId,
        event: SystemEvent,
        body: &str,
    ) -> Result<Outcome<Message>, MarketplaceError> {
        let body = required_text("body", body)?;
        if !conversation.includes(receiver) {
            return Err(MarketplaceError::Validation(format!(
                "{receiver} is not a participant of conversation {}",
                conversation.id
            )));
        }

        let message = Message::system(
            next_message_id(),
            conversation.id.clone(),
            receiver.clone(),
            event,
            body,
            Utc::now(),
        );
        let stored = self.conversations.append(message).map_err(|err| match err {
            RepositoryError::NotFound => {
                MarketplaceError::not_found("conversation", &conversation.id)
            }
            other => MarketplaceError::Repository(other),
        })?;

        let warnings = self.deliver(&stored);
        Ok(Outcome {
            value: stored,
            warnings,
        })
    }

    /// Messages of a conversation, oldest first. Participants and admins only.
    pub fn messages(
        &self,
        id: &ConversationId,
        principal: &Principal,
    ) -> Result<Vec<Message>, MarketplaceError> {
        let conversation = self.fetch(id)?;
        if principal.role != Role::Admin && !conversation.includes(&principal.user_id) {
            return Err(MarketplaceError::Forbidden(
                "only participants may read this conversation".to_string(),
            ));
        }
        Ok(self.conversations.messages(id)?)
    }

    /// Mark the caller's unread messages as read and return how many changed.
    pub fn mark_read(
        &self,
        id: &ConversationId,
        principal: &Principal,
    ) -> Result<usize, MarketplaceError> {
        let conversation = self.fetch(id)?;
        if !conversation.includes(&principal.user_id) {
            return Err(MarketplaceError::Forbidden(
                "only participants may mark messages as read".to_string(),
            ));
        }
        Ok(self
            .conversations
            .mark_read(id, &principal.user_id, Utc::now())?)
    }

    pub fn fetch(&self, id: &ConversationId) -> Result<Conversation, MarketplaceError> {
        self.conversations
            .fetch(id)?
            .ok_or_else(|| MarketplaceError::not_found("conversation", id))
    }

    pub fn for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Option<Conversation>, MarketplaceError> {
        Ok(self.conversations.find_by_booking(booking_id)?)
    }

    // Offline recipients pick the persisted message up later.
    fn deliver(&self, message: &Message) -> Vec<Warning> {
        let Some(connection) = self.presence.lookup(&message.receiver_id) else {
            debug!(
                message_id = %message.id,
                receiver_id = %message.receiver_id,
                "recipient offline; message left for later retrieval"
            );
            return Vec::new();
        };

        match self.fanout.deliver(&connection, message) {
            Ok(()) => Vec::new(),
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    error = %err,
                    "real-time delivery failed"
                );
                vec![Warning::from_delivery(&message.conversation_id, &err)]
            }
        }
    }
}
