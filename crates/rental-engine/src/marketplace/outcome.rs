use serde::Serialize;

use super::domain::ConversationId;
use super::error::MarketplaceError;
use super::repository::DeliveryError;

/// Soft failure attached to a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub detail: String,
}

impl Warning {
    pub fn notification_failed(conversation_id: Option<ConversationId>, detail: String) -> Self {
        Self {
            kind: "notification_delivery_failed",
            conversation_id,
            detail,
        }
    }

    pub(crate) fn from_delivery(conversation_id: &ConversationId, error: &DeliveryError) -> Self {
        Warning::notification_failed(Some(conversation_id.clone()), error.to_string())
    }
}

impl From<&MarketplaceError> for Warning {
    fn from(error: &MarketplaceError) -> Self {
        Warning::notification_failed(None, error.to_string())
    }
}

/// Committed result plus any notification problems that did not unwind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = Warning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}
