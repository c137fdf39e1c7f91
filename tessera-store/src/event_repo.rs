use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use tessera_core::{CoreError, EventStore, PageRequest};
use tessera_domain::{Event, TicketType, UpdateEventRequest};

use crate::database::db_err;
use crate::outbox_repo;

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    total_seats: i32,
    available_seats: i32,
    base_price: i64,
    published: bool,
    created_at: DateTime<Utc>,
}

impl EventRow {
    pub(crate) fn into_event(self) -> Event {
        Event {
            id: self.id,
            name: self.name,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            total_seats: self.total_seats,
            available_seats: self.available_seats,
            base_price: self.base_price,
            published: self.published,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TicketTypeRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    quantity: i32,
    available: i32,
}

impl TicketTypeRow {
    pub(crate) fn into_ticket_type(self) -> TicketType {
        TicketType {
            id: self.id,
            event_id: self.event_id,
            name: self.name,
            description: self.description,
            price: self.price,
            quantity: self.quantity,
            available: self.available,
        }
    }
}

pub(crate) const SELECT_EVENT: &str = "SELECT id, name, description, start_date, end_date, total_seats, available_seats, base_price, published, created_at FROM events";

pub(crate) const SELECT_TICKET_TYPE: &str =
    "SELECT id, event_id, name, description, price, quantity, available FROM ticket_types";

#[async_trait]
impl EventStore for PgEventStore {
    async fn create_event(&self, event: Event, ticket_types: Vec<TicketType>) -> Result<Event, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO events (id, name, description, start_date, end_date, total_seats, available_seats, base_price, published, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.total_seats)
        .bind(event.available_seats)
        .bind(event.base_price)
        .bind(event.published)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for tt in &ticket_types {
            sqlx::query(
                r#"
                INSERT INTO ticket_types (id, event_id, name, description, price, quantity, available)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(tt.id)
            .bind(tt.event_id)
            .bind(&tt.name)
            .bind(&tt.description)
            .bind(tt.price)
            .bind(tt.quantity)
            .bind(tt.available)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        outbox_repo::append(&mut tx, &event.outbox_message("EVENT_CREATED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Event, CoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("event", id))?;
        Ok(row.into_event())
    }

    async fn list_published(&self, page: PageRequest) -> Result<Vec<Event>, CoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{SELECT_EVENT} WHERE published = TRUE ORDER BY start_date ASC LIMIT $1 OFFSET $2"
        ))
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    async fn publish_event(&self, id: Uuid) -> Result<Event, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("event", id))?;

        let mut event = row.into_event();
        event.publish(Utc::now())?;

        sqlx::query("UPDATE events SET published = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        outbox_repo::append(&mut tx, &event.outbox_message("EVENT_PUBLISHED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(event)
    }

    async fn update_event(&self, id: Uuid, update: &UpdateEventRequest) -> Result<Event, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("event", id))?;

        let mut event = row.into_event();
        event.apply_update(update, Utc::now())?;

        sqlx::query(
            "UPDATE events SET name = $1, description = $2, start_date = $3, end_date = $4, base_price = $5, published = $6 WHERE id = $7",
        )
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.base_price)
        .bind(event.published)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        outbox_repo::append(&mut tx, &event.outbox_message("EVENT_UPDATED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(event)
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("event", id))?;

        let event = row.into_event();
        event.ensure_deletable()?;

        // Ticket types go with the event row (ON DELETE CASCADE).
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        outbox_repo::append(&mut tx, &event.outbox_message("EVENT_DELETED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(())
    }

    async fn get_ticket_type(&self, id: Uuid) -> Result<TicketType, CoreError> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!("{SELECT_TICKET_TYPE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("ticket type", id))?;
        Ok(row.into_ticket_type())
    }

    async fn list_ticket_types(&self, event_id: Uuid) -> Result<Vec<TicketType>, CoreError> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "{SELECT_TICKET_TYPE} WHERE event_id = $1 ORDER BY price ASC"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(TicketTypeRow::into_ticket_type).collect())
    }
}
