use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::conversation::BindRequest;
use super::domain::{
    BookingId, BookingRequest, ConversationId, ListingDraft, Principal, PropertyId, Role, UserId,
};
use super::error::MarketplaceError;
use super::Marketplace;

/// Header carrying the authenticated user id, set by the upstream identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's role.
pub const ROLE_HEADER: &str = "x-user-role";

type MarketplaceState = State<Arc<Marketplace>>;

/// Router builder exposing the listing, booking and conversation endpoints.
pub fn marketplace_router(marketplace: Arc<Marketplace>) -> Router {
    Router::new()
        .route("/api/v1/properties", post(register_property_handler))
        .route("/api/v1/properties/:property_id", get(property_handler))
        .route(
            "/api/v1/properties/:property_id/price",
            put(update_price_handler),
        )
        .route(
            "/api/v1/properties/:property_id/availability",
            put(availability_handler),
        )
        .route(
            "/api/v1/properties/:property_id/approve",
            post(approve_handler),
        )
        .route(
            "/api/v1/properties/:property_id/reject",
            post(reject_handler),
        )
        .route("/api/v1/bookings", post(create_booking_handler))
        .route("/api/v1/bookings/:booking_id", get(booking_handler))
        .route(
            "/api/v1/bookings/:booking_id/confirm",
            post(confirm_handler),
        )
        .route("/api/v1/bookings/:booking_id/refuse", post(refuse_handler))
        .route("/api/v1/bookings/:booking_id/cancel", post(cancel_handler))
        .route(
            "/api/v1/bookings/:booking_id/activate",
            post(activate_handler),
        )
        .route(
            "/api/v1/bookings/:booking_id/complete",
            post(complete_handler),
        )
        .route("/api/v1/conversations", post(bind_conversation_handler))
        .route(
            "/api/v1/conversations/:conversation_id/messages",
            get(messages_handler).post(post_message_handler),
        )
        .route(
            "/api/v1/conversations/:conversation_id/read",
            post(mark_read_handler),
        )
        .with_state(marketplace)
}

pub(crate) fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, MarketplaceError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(MarketplaceError::Unauthenticated)?;
    let role = headers
        .get(ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(Role::parse)
        .ok_or(MarketplaceError::Unauthenticated)?;

    Ok(Principal {
        user_id: UserId(user_id.to_string()),
        role,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriceBody {
    pub(crate) monthly_price: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityBody {
    pub(crate) available: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RejectBody {
    pub(crate) reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RefuseBody {
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SystemMessageBody {
    pub(crate) body: String,
}

pub(crate) async fn register_property_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Json(draft): Json<ListingDraft>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let property = marketplace.listings.register(&principal, draft)?;
    Ok((StatusCode::CREATED, Json(property)).into_response())
}

pub(crate) async fn property_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(property_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    principal_from_headers(&headers)?;
    let property = marketplace.listings.get(&PropertyId(property_id))?;
    Ok(Json(property).into_response())
}

pub(crate) async fn update_price_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(property_id): Path<String>,
    Json(body): Json<PriceBody>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let property = marketplace.listings.update_price(
        &PropertyId(property_id),
        &principal,
        body.monthly_price,
    )?;
    Ok(Json(property).into_response())
}

pub(crate) async fn availability_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(property_id): Path<String>,
    Json(body): Json<AvailabilityBody>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let property = marketplace.listings.set_availability(
        &PropertyId(property_id),
        &principal,
        body.available,
    )?;
    Ok(Json(property).into_response())
}

pub(crate) async fn approve_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(property_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let property = marketplace
        .approvals
        .approve(&PropertyId(property_id), &principal)?;
    Ok(Json(property).into_response())
}

pub(crate) async fn reject_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(property_id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let property =
        marketplace
            .approvals
            .reject(&PropertyId(property_id), &principal, &body.reason)?;
    Ok(Json(property).into_response())
}

pub(crate) async fn create_booking_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Json(request): Json<BookingRequest>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let outcome = marketplace.bookings.create(&principal, request)?;
    let status = if outcome.value.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let payload = json!({
        "booking": outcome.value.booking,
        "conversation_id": outcome.value.conversation_id,
        "replayed": outcome.value.replayed,
        "warnings": outcome.warnings,
    });
    Ok((status, Json(payload)).into_response())
}

pub(crate) async fn booking_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let booking = marketplace
        .bookings
        .get(&BookingId(booking_id), &principal)?;
    Ok(Json(booking).into_response())
}

pub(crate) async fn confirm_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let outcome = marketplace
        .bookings
        .confirm(&BookingId(booking_id), &principal)?;
    Ok(Json(json!({ "booking": outcome.value, "warnings": outcome.warnings })).into_response())
}

pub(crate) async fn refuse_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    Json(body): Json<RefuseBody>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let outcome = marketplace.bookings.refuse(
        &BookingId(booking_id),
        &principal,
        body.reason.as_deref(),
    )?;
    Ok(Json(json!({ "booking": outcome.value, "warnings": outcome.warnings })).into_response())
}

pub(crate) async fn cancel_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let outcome = marketplace
        .bookings
        .cancel(&BookingId(booking_id), &principal)?;
    Ok(Json(json!({ "booking": outcome.value, "warnings": outcome.warnings })).into_response())
}

/// Lifecycle hooks driven by the stay scheduler, which calls in with the admin role.
pub(crate) async fn activate_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let booking = marketplace
        .bookings
        .activate(&BookingId(booking_id), &principal)?;
    Ok(Json(json!({ "booking": booking })).into_response())
}

pub(crate) async fn complete_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let booking = marketplace
        .bookings
        .complete(&BookingId(booking_id), &principal)?;
    Ok(Json(json!({ "booking": booking })).into_response())
}

/// Bind an existing booking to its conversation. Callable by either party of the booking or an admin.
pub(crate) async fn bind_conversation_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Json(request): Json<BindRequest>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let outcome = marketplace
        .bookings
        .bind_conversation(&request, &principal)?;
    let payload = json!({
        "conversation_id": outcome.value.conversation.id,
        "created": outcome.value.created,
        "warnings": outcome.warnings,
    });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

/// System messages are posted by internal services, which authenticate with the admin role.
pub(crate) async fn post_message_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Json(body): Json<SystemMessageBody>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    if principal.role != Role::Admin {
        return Err(MarketplaceError::Forbidden(
            "posting system messages requires the admin role".to_string(),
        ));
    }

    let outcome = marketplace
        .conversations
        .post_system_message(&ConversationId(conversation_id), &body.body)?;
    let payload = json!({ "message": outcome.value, "warnings": outcome.warnings });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

pub(crate) async fn messages_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let messages = marketplace
        .conversations
        .messages(&ConversationId(conversation_id), &principal)?;
    Ok(Json(json!({ "messages": messages })).into_response())
}

pub(crate) async fn mark_read_handler(
    State(marketplace): MarketplaceState,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Response, MarketplaceError> {
    let principal = principal_from_headers(&headers)?;
    let updated = marketplace
        .conversations
        .mark_read(&ConversationId(conversation_id), &principal)?;
    Ok(Json(json!({ "updated": updated })).into_response())
}
