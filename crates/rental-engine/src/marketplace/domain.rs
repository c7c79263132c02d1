use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier issued by the identity provider.
    UserId
);
string_id!(
    /// Identifier wrapper for listed properties.
    PropertyId
);
string_id!(
    /// Identifier wrapper for booking requests.
    BookingId
);
string_id!(
    /// Identifier of a conversation thread; equal to the id of its opening message.
    ConversationId
);
string_id!(MessageId);

/// Role attached to an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Tenant,
    Agent,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Tenant => "tenant",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Role::Owner),
            "tenant" => Some(Role::Tenant),
            "agent" => Some(Role::Agent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            role,
        }
    }
}

/// Moderation lifecycle of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub const fn label(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ApprovalState::Pending),
            "approved" => Some(ApprovalState::Approved),
            "rejected" => Some(ApprovalState::Rejected),
            _ => None,
        }
    }
}

/// Owner supplied listing fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub title: String,
    pub city: String,
    pub monthly_price: u32,
}

/// Listed property together with its moderation metadata.
///
/// `rejection_reason` is present exactly when the listing is rejected, and the decision stamp
/// (`approved_by`, `approval_decided_at`) is present exactly when it is no longer pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner_id: UserId,
    pub title: String,
    pub city: String,
    pub monthly_price: u32,
    pub approval_state: ApprovalState,
    pub rejection_reason: Option<String>,
    pub approved_by: Option<UserId>,
    pub approval_decided_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

impl Property {
    /// Whether tenants may currently request a booking against this listing.
    pub fn accepts_bookings(&self) -> bool {
        self.approval_state == ApprovalState::Approved && self.is_available
    }
}

/// Column changes written by an approval decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub state: ApprovalState,
    pub rejection_reason: Option<String>,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
    /// Approval puts the listing back online, rejection takes it offline.
    pub is_active: bool,
}

impl ApprovalDecision {
    pub fn approve(admin: UserId, at: DateTime<Utc>) -> Self {
        Self {
            state: ApprovalState::Approved,
            rejection_reason: None,
            decided_by: admin,
            decided_at: at,
            is_active: true,
        }
    }

    pub fn reject(admin: UserId, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            state: ApprovalState::Rejected,
            rejection_reason: Some(reason),
            decided_by: admin,
            decided_at: at,
            is_active: false,
        }
    }

    pub fn apply_to(&self, property: &mut Property) {
        property.approval_state = self.state;
        property.rejection_reason = self.rejection_reason.clone();
        property.approved_by = Some(self.decided_by.clone());
        property.approval_decided_at = Some(self.decided_at);
        property.is_active = self.is_active;
    }
}

/// Reservation lifecycle of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Refused,
    Cancelled,
    Active,
    Completed,
}

impl BookingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Refused => "refused",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Refused | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }
}

/// Tenant request body for a new booking. Prices are never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub property_id: PropertyId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_months: u32,
    #[serde(default)]
    pub agent_id: Option<UserId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Booking row. `owner_id`, `monthly_price` and `total_price` are snapshots taken at creation
/// and are never refreshed from the property afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub property_id: PropertyId,
    pub tenant_id: UserId,
    pub owner_id: UserId,
    pub agent_id: Option<UserId>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_months: u32,
    pub monthly_price: u32,
    pub total_price: u64,
    pub status: BookingStatus,
    pub decision_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.tenant_id == user || &self.owner_id == user
    }
}

/// Column changes written by a booking transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTransition {
    pub to: BookingStatus,
    pub decision_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl BookingTransition {
    pub fn to(status: BookingStatus, at: DateTime<Utc>) -> Self {
        Self {
            to: status,
            decision_reason: None,
            confirmed_at: None,
            at,
        }
    }

    pub fn apply_to(&self, booking: &mut Booking) {
        booking.status = self.to;
        if let Some(reason) = &self.decision_reason {
            booking.decision_reason = Some(reason.clone());
        }
        if let Some(confirmed_at) = self.confirmed_at {
            booking.confirmed_at = Some(confirmed_at);
        }
        booking.updated_at = self.at;
    }
}

/// Message thread between a tenant and an owner, optionally tied to one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub booking_id: Option<BookingId>,
    pub property_id: PropertyId,
    pub tenant_id: UserId,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user: &UserId) -> bool {
        &self.tenant_id == user || &self.owner_id == user
    }
}

/// Booking events that produce a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEvent {
    ConversationOpened,
    BookingRequested,
    BookingConfirmed,
    BookingRefused,
    BookingCancelled,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// `None` for system generated messages.
    pub sender_id: Option<UserId>,
    pub receiver_id: UserId,
    pub body: String,
    pub is_system_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SystemEvent>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn system(
        id: MessageId,
        conversation_id: ConversationId,
        receiver_id: UserId,
        event: SystemEvent,
        body: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id: None,
            receiver_id,
            body,
            is_system_generated: true,
            event: Some(event),
            is_read: false,
            read_at: None,
            created_at: at,
        }
    }
}
