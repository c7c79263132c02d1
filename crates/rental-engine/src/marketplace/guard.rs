use super::domain::{BookingRequest, Principal, Role, UserId};
use super::error::MarketplaceError;

pub(crate) fn require_role(
    principal: &Principal,
    role: Role,
    action: &str,
) -> Result<(), MarketplaceError> {
    if principal.role == role {
        Ok(())
    } else {
        Err(MarketplaceError::Forbidden(format!(
            "{action} requires the {} role",
            role.label()
        )))
    }
}

/// Ownership relation check: the caller must be the user recorded on the entity.
pub(crate) fn require_party(
    principal: &Principal,
    expected: &UserId,
    relation: &str,
    action: &str,
) -> Result<(), MarketplaceError> {
    if &principal.user_id == expected {
        Ok(())
    } else {
        Err(MarketplaceError::Forbidden(format!(
            "only the {relation} may {action}"
        )))
    }
}

/// Trim and require a non-empty text field.
pub(crate) fn required_text(field: &str, value: &str) -> Result<String, MarketplaceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(MarketplaceError::Validation(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn validate_stay(request: &BookingRequest) -> Result<(), MarketplaceError> {
    if request.duration_months == 0 {
        return Err(MarketplaceError::Validation(
            "duration_months must be at least 1".to_string(),
        ));
    }
    if request.start_date >= request.end_date {
        return Err(MarketplaceError::Validation(
            "start_date must be before end_date".to_string(),
        ));
    }
    if let Some(key) = &request.idempotency_key {
        required_text("idempotency_key", key)?;
    }
    Ok(())
}
