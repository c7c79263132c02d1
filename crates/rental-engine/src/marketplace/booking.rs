use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::conversation::{BindRequest, Binding, ConversationBinder};
use super::domain::{
    Booking, BookingId, BookingRequest, BookingStatus, BookingTransition, ConversationId,
    Principal, Role, SystemEvent, UserId,
};
use super::error::MarketplaceError;
use super::guard::{require_party, require_role, required_text, validate_stay};
use super::outcome::{Outcome, Warning};
use super::repository::{BookingRepository, Inserted, PropertyRepository};
use crate::config::MarketplaceConfig;

static BOOKING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_booking_id() -> BookingId {
    let id = BOOKING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    BookingId(format!("bkg-{id:06}"))
}

/// Result of a booking creation, including idempotent replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// `true` when an earlier request with the same idempotency key already created the booking.
    pub replayed: bool,
}

/// Reservation state machine.
///
/// ```text
/// pending --owner confirm--> confirmed --activate--> active --complete--> completed
/// pending --owner refuse---> refused
/// pending --tenant cancel--> cancelled
/// ```
///
/// Every transition is a compare-and-set on `(id, expected status)`. Conversation messages are
/// emitted after the write commits; their failures come back as warnings and never undo it.
pub struct BookingService {
    properties: Arc<dyn PropertyRepository>,
    bookings: Arc<dyn BookingRepository>,
    binder: Arc<ConversationBinder>,
    config: MarketplaceConfig,
}

impl BookingService {
    pub fn new(
        properties: Arc<dyn PropertyRepository>,
        bookings: Arc<dyn BookingRepository>,
        binder: Arc<ConversationBinder>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            properties,
            bookings,
            binder,
            config,
        }
    }

    /// Request a booking against an approved, available listing.
    ///
    /// Price and owner are read from the property, never from the request. The owner id is a
    /// deliberate snapshot: it records who the tenant negotiated with even if the listing later
    /// changes hands.
    pub fn create(
        &self,
        principal: &Principal,
        request: BookingRequest,
    ) -> Result<Outcome<BookingReceipt>, MarketplaceError> {
        require_role(principal, Role::Tenant, "requesting a booking")?;
        validate_stay(&request)?;

        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .map(|key| format!("{}:{}", principal.user_id, key.trim()));
        if let Some(key) = &idempotency_key {
            if let Some(original) = self.bookings.find_by_idempotency_key(key)? {
                return self.replay(original, &request);
            }
        }

        let property = self
            .properties
            .fetch(&request.property_id)?
            .ok_or_else(|| MarketplaceError::not_found("property", &request.property_id))?;
        if !property.accepts_bookings() {
            return Err(MarketplaceError::PropertyUnavailable(property.id.0));
        }
        if property.owner_id == principal.user_id {
            return Err(MarketplaceError::Forbidden(
                "owners cannot book their own listing".to_string(),
            ));
        }

        let now = Utc::now();
        let monthly_price = property.monthly_price;
        let booking = Booking {
            id: next_booking_id(),
            property_id: property.id.clone(),
            tenant_id: principal.user_id.clone(),
            owner_id: property.owner_id.clone(),
            agent_id: request.agent_id.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            duration_months: request.duration_months,
            monthly_price,
            total_price: u64::from(monthly_price) * u64::from(request.duration_months),
            status: BookingStatus::Pending,
            decision_reason: None,
            confirmed_at: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        };

        match self.bookings.insert(booking)? {
            // Lost the race to a concurrent retry carrying the same key.
            Inserted::Existing(original) => self.replay(original, &request),
            Inserted::Created(booking) => {
                info!(
                    booking_id = %booking.id,
                    property_id = %booking.property_id,
                    tenant_id = %booking.tenant_id,
                    total_price = booking.total_price,
                    "booking requested"
                );
                let body = format!(
                    "New booking request from {} to {} ({} months) at {} per month, {} in total.",
                    booking.start_date,
                    booking.end_date,
                    booking.duration_months,
                    booking.monthly_price,
                    booking.total_price
                );
                let (conversation_id, warnings) = self.narrate(
                    &booking,
                    &booking.owner_id,
                    SystemEvent::BookingRequested,
                    &body,
                );
                Ok(Outcome {
                    value: BookingReceipt {
                        booking,
                        conversation_id,
                        replayed: false,
                    },
                    warnings,
                })
            }
        }
    }

    fn replay(
        &self,
        original: Booking,
        request: &BookingRequest,
    ) -> Result<Outcome<BookingReceipt>, MarketplaceError> {
        if original.property_id != request.property_id
            || original.start_date != request.start_date
            || original.end_date != request.end_date
            || original.duration_months != request.duration_months
            || original.agent_id != request.agent_id
        {
            return Err(MarketplaceError::Validation(
                "idempotency_key was already used for a different booking request".to_string(),
            ));
        }

        info!(booking_id = %original.id, "booking request replayed");
        let (conversation_id, warnings) = match self.binder.for_booking(&original.id) {
            Ok(conversation) => (conversation.map(|conversation| conversation.id), Vec::new()),
            Err(err) => {
                warn!(
                    booking_id = %original.id,
                    error = %err,
                    "could not look up conversation for replayed booking"
                );
                (None, vec![Warning::from(&err)])
            }
        };
        Ok(Outcome {
            value: BookingReceipt {
                booking: original,
                conversation_id,
                replayed: true,
            },
            warnings,
        })
    }

    pub fn confirm(
        &self,
        id: &BookingId,
        principal: &Principal,
    ) -> Result<Outcome<Booking>, MarketplaceError> {
        let booking = self.fetch(id)?;
        require_party(principal, &booking.owner_id, "owner", "confirm this booking")?;

        let now = Utc::now();
        let transition = BookingTransition {
            confirmed_at: Some(now),
            ..BookingTransition::to(BookingStatus::Confirmed, now)
        };
        let updated = self.apply(&booking, "confirm", BookingStatus::Pending, &transition)?;

        let body = format!(
            "Your booking from {} to {} has been confirmed by the owner. Total price: {}.",
            updated.start_date, updated.end_date, updated.total_price
        );
        let (_, warnings) = self.narrate(
            &updated,
            &updated.tenant_id,
            SystemEvent::BookingConfirmed,
            &body,
        );
        Ok(Outcome::clean(updated).with_warnings(warnings))
    }

    /// Refuse a pending booking. An omitted reason falls back to the configured default; a
    /// supplied but blank one is rejected.
    pub fn refuse(
        &self,
        id: &BookingId,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<Outcome<Booking>, MarketplaceError> {
        let booking = self.fetch(id)?;
        require_party(principal, &booking.owner_id, "owner", "refuse this booking")?;
        let reason = match reason {
            Some(reason) => required_text("reason", reason)?,
            None => self.config.default_refusal_reason.clone(),
        };

        let transition = BookingTransition {
            decision_reason: Some(reason.clone()),
            ..BookingTransition::to(BookingStatus::Refused, Utc::now())
        };
        let updated = self.apply(&booking, "refuse", BookingStatus::Pending, &transition)?;

        let body = format!(
            "Your booking request from {} to {} was declined. Reason: {}",
            updated.start_date, updated.end_date, reason
        );
        let (_, warnings) = self.narrate(
            &updated,
            &updated.tenant_id,
            SystemEvent::BookingRefused,
            &body,
        );
        Ok(Outcome::clean(updated).with_warnings(warnings))
    }

    pub fn cancel(
        &self,
        id: &BookingId,
        principal: &Principal,
    ) -> Result<Outcome<Booking>, MarketplaceError> {
        let booking = self.fetch(id)?;
        require_party(principal, &booking.tenant_id, "tenant", "cancel this booking")?;

        let transition = BookingTransition::to(BookingStatus::Cancelled, Utc::now());
        let updated = self.apply(&booking, "cancel", BookingStatus::Pending, &transition)?;

        let body = format!(
            "The tenant withdrew the booking request from {} to {}.",
            updated.start_date, updated.end_date
        );
        let (_, warnings) = self.narrate(
            &updated,
            &updated.owner_id,
            SystemEvent::BookingCancelled,
            &body,
        );
        Ok(Outcome::clean(updated).with_warnings(warnings))
    }

    /// Move a confirmed booking to `active` when the stay begins. Scheduler identity (admin) only.
    pub fn activate(
        &self,
        id: &BookingId,
        principal: &Principal,
    ) -> Result<Booking, MarketplaceError> {
        require_role(principal, Role::Admin, "activating a booking")?;
        let booking = self.fetch(id)?;
        let transition = BookingTransition::to(BookingStatus::Active, Utc::now());
        self.apply(&booking, "activate", BookingStatus::Confirmed, &transition)
    }

    pub fn complete(
        &self,
        id: &BookingId,
        principal: &Principal,
    ) -> Result<Booking, MarketplaceError> {
        require_role(principal, Role::Admin, "completing a booking")?;
        let booking = self.fetch(id)?;
        let transition = BookingTransition::to(BookingStatus::Completed, Utc::now());
        self.apply(&booking, "complete", BookingStatus::Active, &transition)
    }

    /// Fetch a booking visible to its tenant, its owner, or an admin.
    pub fn get(&self, id: &BookingId, principal: &Principal) -> Result<Booking, MarketplaceError> {
        let booking = self.fetch(id)?;
        if principal.role != Role::Admin && !booking.involves(&principal.user_id) {
            return Err(MarketplaceError::Forbidden(
                "only the tenant or owner may view this booking".to_string(),
            ));
        }
        Ok(booking)
    }

    /// Bind a booking to its conversation on behalf of a caller.
    ///
    /// The booking must exist and the caller must be one of its parties or an admin. Parties
    /// and property are taken from the stored booking; a request naming anyone else is
    /// rejected.
    pub fn bind_conversation(
        &self,
        request: &BindRequest,
        principal: &Principal,
    ) -> Result<Outcome<Binding>, MarketplaceError> {
        request.validate()?;
        let booking = self.get(&request.booking_id, principal)?;
        if let Some(field) = request.mismatch_with(&booking) {
            return Err(MarketplaceError::Validation(format!(
                "{field} does not match booking {}",
                booking.id
            )));
        }
        self.binder
            .find_or_create_for_booking(&BindRequest::for_booking(&booking))
    }

    fn fetch(&self, id: &BookingId) -> Result<Booking, MarketplaceError> {
        self.bookings
            .fetch(id)?
            .ok_or_else(|| MarketplaceError::not_found("booking", id))
    }

    fn apply(
        &self,
        booking: &Booking,
        action: &'static str,
        expected: BookingStatus,
        transition: &BookingTransition,
    ) -> Result<Booking, MarketplaceError> {
        if booking.status != expected {
            return Err(MarketplaceError::InvalidTransition {
                from: booking.status.label(),
                action,
            });
        }

        match self.bookings.transition(&booking.id, expected, transition)? {
            Some(updated) => {
                info!(
                    booking_id = %updated.id,
                    from = expected.label(),
                    to = updated.status.label(),
                    "booking transitioned"
                );
                Ok(updated)
            }
            None => {
                warn!(
                    booking_id = %booking.id,
                    expected = expected.label(),
                    action,
                    "booking transition lost a concurrent update"
                );
                Err(MarketplaceError::concurrent("booking", &booking.id))
            }
        }
    }

    // Bind-then-post. Errors here are reported, never propagated.
    fn narrate(
        &self,
        booking: &Booking,
        receiver: &UserId,
        event: SystemEvent,
        body: &str,
    ) -> (Option<ConversationId>, Vec<Warning>) {
        let request = BindRequest::for_booking(booking);

        let binding = match self.binder.find_or_create_for_booking(&request) {
            Ok(binding) => binding,
            Err(err) => {
                warn!(booking_id = %booking.id, error = %err, "could not bind booking conversation");
                return (None, vec![Warning::from(&err)]);
            }
        };

        let conversation = binding.value.conversation;
        let mut warnings = binding.warnings;
        match self.binder.notify(&conversation, receiver, event, body) {
            Ok(posted) => warnings.extend(posted.warnings),
            Err(err) => {
                warn!(
                    booking_id = %booking.id,
                    conversation_id = %conversation.id,
                    error = %err,
                    "could not post booking system message"
                );
                let mut warning = Warning::from(&err);
                warning.conversation_id = Some(conversation.id.clone());
                warnings.push(warning);
            }
        }
        (Some(conversation.id), warnings)
    }
}
