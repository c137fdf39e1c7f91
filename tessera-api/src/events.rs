use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use tessera_core::{CoreError, PageRequest};
use tessera_domain::{Event, TicketType, UpdateEventRequest};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub base_price: i64,
    pub ticket_types: Vec<CreateTicketTypeRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketTypeRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl PageQuery {
    pub fn into_page(self) -> PageRequest {
        let default = PageRequest::default();
        PageRequest {
            page: self.page.unwrap_or(default.page),
            size: self.size.unwrap_or(default.size),
        }
    }
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events", get(list_events))
        .route("/v1/events/{id}", get(get_event))
        .route("/v1/events/{id}/ticket-types", get(list_ticket_types))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events", post(create_event))
        .route("/v1/events/{id}", put(update_event).delete(delete_event))
        .route("/v1/events/{id}/publish", post(publish_event))
}

async fn create_event(
    State(state): State<AppState>,
    Json(payload): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    if payload.ticket_types.is_empty() {
        return Err(CoreError::EventNotBookable("event needs at least one ticket type".into()).into());
    }

    let total_seats: i32 = payload.ticket_types.iter().map(|tt| tt.quantity).sum();
    let event = Event::new(
        payload.name,
        payload.description,
        payload.start_date,
        payload.end_date,
        total_seats,
        payload.base_price,
    )
    .map_err(CoreError::from)?;
    let ticket_types: Vec<TicketType> = payload
        .ticket_types
        .into_iter()
        .map(|tt| TicketType::new(event.id, tt.name, tt.description, tt.price, tt.quantity))
        .collect::<Result<_, _>>()
        .map_err(CoreError::from)?;

    let event = state.events.create_event(event, ticket_types).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn list_events(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.events.list_published(page.into_page()).await?;
    Ok(Json(events))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    let event = state.events.get_event(id).await?;
    Ok(Json(event))
}

async fn publish_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    let event = state.events.publish_event(id).await?;
    Ok(Json(event))
}

async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEventRequest>,
) -> Result<Json<Event>, ApiError> {
    let event = state.events.update_event(id, &payload).await?;
    Ok(Json(event))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.events.delete_event(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_ticket_types(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TicketType>>, ApiError> {
    // 404 for events that do not exist, empty list for ones without tiers.
    state.events.get_event(id).await?;
    let ticket_types = state.events.list_ticket_types(id).await?;
    Ok(Json(ticket_types))
}
