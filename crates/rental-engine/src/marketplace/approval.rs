use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::domain::{ApprovalDecision, ApprovalState, Principal, Property, PropertyId, Role};
use super::error::MarketplaceError;
use super::guard::{require_role, required_text};
use super::repository::PropertyRepository;

/// Admin moderation of listings.
///
/// Allowed moves are `pending -> approved`, `pending -> rejected` and re-decision between
/// `approved` and `rejected`. Nothing returns a listing to `pending`. Each decision is written
/// with a compare-and-set on the approval state read at the start of the call.
pub struct ApprovalService {
    properties: Arc<dyn PropertyRepository>,
}

impl ApprovalService {
    pub fn new(properties: Arc<dyn PropertyRepository>) -> Self {
        Self { properties }
    }

    pub fn approve(
        &self,
        id: &PropertyId,
        principal: &Principal,
    ) -> Result<Property, MarketplaceError> {
        require_role(principal, Role::Admin, "approving a listing")?;
        let decision = ApprovalDecision::approve(principal.user_id.clone(), Utc::now());
        self.decide(id, decision)
    }

    /// Reject a listing and take it offline.
    pub fn reject(
        &self,
        id: &PropertyId,
        principal: &Principal,
        reason: &str,
    ) -> Result<Property, MarketplaceError> {
        require_role(principal, Role::Admin, "rejecting a listing")?;
        let reason = required_text("reason", reason)?;
        let decision = ApprovalDecision::reject(principal.user_id.clone(), reason, Utc::now());
        self.decide(id, decision)
    }

    fn decide(
        &self,
        id: &PropertyId,
        decision: ApprovalDecision,
    ) -> Result<Property, MarketplaceError> {
        let current = self
            .properties
            .fetch(id)?
            .ok_or_else(|| MarketplaceError::not_found("property", id))?;

        if current.approval_state == decision.state {
            return Err(MarketplaceError::AlreadyInState(decision.state.label()));
        }

        match self
            .properties
            .apply_decision(id, current.approval_state, &decision)?
        {
            Some(updated) => {
                info!(
                    property_id = %id,
                    admin_id = %decision.decided_by,
                    from = current.approval_state.label(),
                    to = updated.approval_state.label(),
                    "listing moderation decided"
                );
                Ok(updated)
            }
            None => {
                warn!(
                    property_id = %id,
                    expected = current.approval_state.label(),
                    "listing moderation lost a concurrent update"
                );
                Err(MarketplaceError::concurrent("property", id))
            }
        }
    }

    /// Current moderation state, mostly for callers that need to re-fetch after a conflict.
    pub fn state(&self, id: &PropertyId) -> Result<ApprovalState, MarketplaceError> {
        self.properties
            .fetch(id)?
            .map(|property| property.approval_state)
            .ok_or_else(|| MarketplaceError::not_found("property", id))
    }
}
