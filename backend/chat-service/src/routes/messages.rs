//! Chat message endpoints, mounted under `/api/chats` behind JWT auth

use crate::{
    error::AppError,
    middleware::guards::User,
    services::{
        delivery::{BulkDeliveryRequest, SingleDeliveryRequest},
        fanout::SendEnvelope,
        history::{collapse, HistoryQuery},
        lifecycle::{DeleteRequest, EditRequest},
    },
    state::AppState,
    websocket::events::RelayEvent,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

/// POST /send
///
/// Persists the message (one row per receiver for broadcasts) and queues a
/// single `message-sent` event carrying the collapsed message.
#[post("/send")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<SendEnvelope>,
) -> Result<HttpResponse, AppError> {
    let request = body
        .into_inner()
        .new_message
        .ok_or_else(|| AppError::Validation("Missing required field: newMessage".into()))?;

    let result = state.fanout.send(request).await?;
    for message in collapse(result.messages.clone()) {
        state.relay.publish(RelayEvent::MessageSent { message });
    }

    tracing::info!(
        user_id = %user.id,
        rows = result.messages.len(),
        failed = result.failed_receivers.len(),
        "message sent"
    );
    Ok(HttpResponse::Created().json(result))
}

/// PUT /update/{messageId}
#[put("/update/{message_id}")]
pub async fn update_message(
    state: web::Data<AppState>,
    _user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<EditRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .lifecycle
        .edit_content(message_id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// GET /messages/{userId1}/{userId2}?type&skip&limit
#[get("/messages/{user_id1}/{user_id2}")]
pub async fn get_messages(
    state: web::Data<AppState>,
    _user: User,
    path: web::Path<(Uuid, Uuid)>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let (user1, user2) = path.into_inner();
    let messages = state.history.conversation(user1, user2, &query).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /updateDeliverType
#[post("/updateDeliverType")]
pub async fn update_deliver_type(
    state: web::Data<AppState>,
    _user: User,
    body: web::Json<BulkDeliveryRequest>,
) -> Result<HttpResponse, AppError> {
    let outcome = state.delivery.bulk_transition(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// PUT /deliverTypeUpdate
#[put("/deliverTypeUpdate")]
pub async fn deliver_type_update(
    state: web::Data<AppState>,
    _user: User,
    body: web::Json<SingleDeliveryRequest>,
) -> Result<HttpResponse, AppError> {
    state.delivery.single_transition(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "deliverType updated successfully." })))
}

/// GET /unreadCount/{loggedInUserId}
#[get("/unreadCount/{user_id}")]
pub async fn unread_count(
    state: web::Data<AppState>,
    _user: User,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summary = state.delivery.unread_count(user_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// DELETE /{id}
///
/// Body `{senderId, receiverId}` is optional; missing ids default to the
/// stored sender and first receiver.
#[delete("/{message_id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: Option<web::Json<DeleteRequest>>,
) -> Result<HttpResponse, AppError> {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let message = state
        .lifecycle
        .soft_delete(message_id.into_inner(), request)
        .await?;
    tracing::debug!(user_id = %user.id, message_id = %message.id, "delete requested");
    Ok(HttpResponse::Ok().json(message))
}
