use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::domain::{ApprovalState, ListingDraft, Principal, Property, PropertyId, Role};
use super::error::MarketplaceError;
use super::guard::{require_party, require_role, required_text};
use super::repository::{PropertyRepository, RepositoryError};

static PROPERTY_SEQUENCE: AtomicU64 = AtomicU64::new(1);
const MAX_ID_ATTEMPTS: usize = 64;

fn next_property_id() -> PropertyId {
    let id = PROPERTY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PropertyId(format!("prop-{id:06}"))
}

/// Owner-facing listing registration and maintenance. Moderation lives in `ApprovalService`.
pub struct ListingService {
    properties: Arc<dyn PropertyRepository>,
}

impl ListingService {
    pub fn new(properties: Arc<dyn PropertyRepository>) -> Self {
        Self { properties }
    }

    /// Register a new listing in `pending` moderation.
    pub fn register(
        &self,
        principal: &Principal,
        draft: ListingDraft,
    ) -> Result<Property, MarketplaceError> {
        require_role(principal, Role::Owner, "listing a property")?;
        let title = required_text("title", &draft.title)?;
        let city = required_text("city", &draft.city)?;
        if draft.monthly_price == 0 {
            return Err(MarketplaceError::Validation(
                "monthly_price must be positive".to_string(),
            ));
        }

        let mut property = Property {
            id: next_property_id(),
            owner_id: principal.user_id.clone(),
            title,
            city,
            monthly_price: draft.monthly_price,
            approval_state: ApprovalState::Pending,
            rejection_reason: None,
            approved_by: None,
            approval_decided_at: None,
            is_active: true,
            is_available: true,
            created_at: Utc::now(),
        };

        // Seeded listings may already hold ids from the generated sequence.
        let mut attempts = 1;
        let stored = loop {
            match self.properties.insert(property.clone()) {
                Err(RepositoryError::Conflict) if attempts < MAX_ID_ATTEMPTS => {
                    debug!(property_id = %property.id, "listing id taken; drawing another");
                    property.id = next_property_id();
                    attempts += 1;
                }
                result => break result?,
            }
        };
        info!(property_id = %stored.id, owner_id = %stored.owner_id, "listing registered");
        Ok(stored)
    }

    pub fn get(&self, id: &PropertyId) -> Result<Property, MarketplaceError> {
        self.properties
            .fetch(id)?
            .ok_or_else(|| MarketplaceError::not_found("property", id))
    }

    /// Change the advertised price. Existing bookings keep the price they were created with.
    pub fn update_price(
        &self,
        id: &PropertyId,
        principal: &Principal,
        monthly_price: u32,
    ) -> Result<Property, MarketplaceError> {
        if monthly_price == 0 {
            return Err(MarketplaceError::Validation(
                "monthly_price must be positive".to_string(),
            ));
        }
        let current = self.get(id)?;
        require_party(principal, &current.owner_id, "owner", "change the price")?;

        self.properties
            .set_monthly_price(id, monthly_price)?
            .ok_or_else(|| MarketplaceError::not_found("property", id))
    }

    pub fn set_availability(
        &self,
        id: &PropertyId,
        principal: &Principal,
        available: bool,
    ) -> Result<Property, MarketplaceError> {
        let current = self.get(id)?;
        require_party(principal, &current.owner_id, "owner", "change availability")?;

        self.properties
            .set_availability(id, available)?
            .ok_or_else(|| MarketplaceError::not_found("property", id))
    }
}
