use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tessera_core::{BookingStore, BookingTransition, CoreError, PageRequest};
use tessera_domain::{Booking, BookingItem, BookingStatus, CreateBookingRequest, Event, TicketType};

use crate::database::db_err;
use crate::event_repo::{EventRow, TicketTypeRow, SELECT_EVENT, SELECT_TICKET_TYPE};
use crate::outbox_repo;

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_number: String,
    event_id: Uuid,
    user_id: String,
    total_amount: i64,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BookingItemRow {
    id: Uuid,
    booking_id: Uuid,
    ticket_type_id: Uuid,
    quantity: i32,
    unit_price: i64,
    total_price: i64,
}

const SELECT_BOOKING: &str = "SELECT id, booking_number, event_id, user_id, total_amount, status, expires_at, created_at FROM bookings";

const SELECT_ITEMS: &str = "SELECT id, booking_id, ticket_type_id, quantity, unit_price, total_price FROM booking_items WHERE booking_id = $1 ORDER BY ticket_type_id ASC";

fn assemble(row: BookingRow, item_rows: Vec<BookingItemRow>) -> Result<Booking, CoreError> {
    let status = BookingStatus::parse(&row.status)
        .ok_or_else(|| CoreError::Storage(format!("unknown booking status: {}", row.status)))?;
    Ok(Booking {
        id: row.id,
        booking_number: row.booking_number,
        event_id: row.event_id,
        user_id: row.user_id,
        total_amount: row.total_amount,
        status,
        expires_at: row.expires_at,
        items: item_rows
            .into_iter()
            .map(|i| BookingItem {
                id: i.id,
                booking_id: i.booking_id,
                ticket_type_id: i.ticket_type_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
                total_price: i.total_price,
            })
            .collect(),
        created_at: row.created_at,
    })
}

/// Load a booking with its items, holding the booking row lock for the rest
/// of the transaction. Shared with the payment flow, which confirms bookings.
pub(crate) async fn load_booking_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Booking, CoreError> {
    let row = sqlx::query_as::<_, BookingRow>(&format!("{SELECT_BOOKING} WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("booking", id))?;

    let items = sqlx::query_as::<_, BookingItemRow>(SELECT_ITEMS)
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err)?;

    assemble(row, items)
}

pub(crate) async fn update_booking_status(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2")
        .bind(booking.status.as_str())
        .bind(booking.id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn lock_event(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Event, CoreError> {
    let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("event", id))?;
    Ok(row.into_event())
}

async fn lock_ticket_type(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<TicketType, CoreError> {
    let row = sqlx::query_as::<_, TicketTypeRow>(&format!("{SELECT_TICKET_TYPE} WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("ticket type", id))?;
    Ok(row.into_ticket_type())
}

async fn write_inventory(
    tx: &mut Transaction<'_, Postgres>,
    event: &Event,
    ticket_types: &[TicketType],
) -> Result<(), CoreError> {
    for tt in ticket_types {
        sqlx::query("UPDATE ticket_types SET available = $1 WHERE id = $2")
            .bind(tt.available)
            .bind(tt.id)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
    }
    sqlx::query("UPDATE events SET available_seats = $1 WHERE id = $2")
        .bind(event.available_seats)
        .bind(event.id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Return a terminal booking's seats to the pool. Lock order matches the
/// reserve path: event row first, then ticket types ascending by id.
async fn release_inventory(tx: &mut Transaction<'_, Postgres>, booking: &Booking) -> Result<(), CoreError> {
    let mut event = lock_event(tx, booking.event_id).await?;

    let mut items: Vec<&BookingItem> = booking.items.iter().collect();
    items.sort_by_key(|i| i.ticket_type_id);

    let mut updated: Vec<TicketType> = Vec::with_capacity(items.len());
    for item in items {
        // Re-locking a row already in the working set would read back the
        // pre-UPDATE availability; release into the copy we hold instead.
        let pos = match updated.iter().position(|t| t.id == item.ticket_type_id) {
            Some(pos) => pos,
            None => {
                updated.push(lock_ticket_type(tx, item.ticket_type_id).await?);
                updated.len() - 1
            }
        };
        updated[pos].release(item.quantity)?;
    }
    event.release_seats(booking.ticket_count())?;

    write_inventory(tx, &event, &updated).await
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
        user_id: &str,
        hold: Duration,
    ) -> Result<Booking, CoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut event = lock_event(&mut tx, request.event_id).await?;
        event.validate_bookable(now)?;

        // Ascending id order keeps concurrent bookings from deadlocking on
        // overlapping ticket type sets.
        let mut requested = request.items.clone();
        requested.sort_by_key(|i| i.ticket_type_id);

        let mut booking = Booking::new(request.event_id, user_id.to_string(), hold);
        let mut reserved: Vec<TicketType> = Vec::with_capacity(requested.len());
        for item in &requested {
            // When the request names the same ticket type twice, reserve from
            // the copy already locked and held; re-selecting the row would
            // see the availability from before this transaction's UPDATE.
            let pos = match reserved.iter().position(|t| t.id == item.ticket_type_id) {
                Some(pos) => pos,
                None => {
                    let tt = lock_ticket_type(&mut tx, item.ticket_type_id).await?;
                    if tt.event_id != event.id {
                        return Err(CoreError::EventNotBookable(
                            "ticket type does not belong to this event".into(),
                        ));
                    }
                    reserved.push(tt);
                    reserved.len() - 1
                }
            };
            reserved[pos].reserve(item.quantity)?;
            booking.attach_item(BookingItem::new(
                booking.id,
                item.ticket_type_id,
                item.quantity,
                reserved[pos].price,
            )?);
        }
        event.reserve_seats(booking.ticket_count())?;

        write_inventory(&mut tx, &event, &reserved).await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, booking_number, event_id, user_id, total_amount, status, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.booking_number)
        .bind(booking.event_id)
        .bind(&booking.user_id)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for item in &booking.items {
            sqlx::query(
                r#"
                INSERT INTO booking_items (id, booking_id, ticket_type_id, quantity, unit_price, total_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(item.booking_id)
            .bind(item.ticket_type_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        outbox_repo::append(&mut tx, &booking.outbox_message("BOOKING_CREATED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Booking, CoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{SELECT_BOOKING} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("booking", id))?;

        let items = sqlx::query_as::<_, BookingItemRow>(SELECT_ITEMS)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        assemble(row, items)
    }

    async fn list_bookings(&self, user_id: &str, page: PageRequest) -> Result<Vec<Booking>, CoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{SELECT_BOOKING} WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in rows {
            let items = sqlx::query_as::<_, BookingItemRow>(SELECT_ITEMS)
                .bind(row.id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            bookings.push(assemble(row, items)?);
        }
        Ok(bookings)
    }

    async fn finalize_booking(
        &self,
        id: Uuid,
        transition: BookingTransition,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The guard runs under the row lock, so a confirm/expire race settles
        // on whichever transaction committed first.
        let mut booking = load_booking_for_update(&mut tx, id).await?;
        let event_type = match transition {
            BookingTransition::Confirm => {
                booking.confirm(now)?;
                "BOOKING_CONFIRMED"
            }
            BookingTransition::Cancel => {
                booking.cancel()?;
                release_inventory(&mut tx, &booking).await?;
                "BOOKING_CANCELLED"
            }
            BookingTransition::Expire => {
                booking.expire(now)?;
                release_inventory(&mut tx, &booking).await?;
                "BOOKING_EXPIRED"
            }
        };

        update_booking_status(&mut tx, &booking).await?;
        outbox_repo::append(&mut tx, &booking.outbox_message(event_type)?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(booking)
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, CoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bookings WHERE status = 'PENDING' AND expires_at < $1 ORDER BY expires_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ids)
    }
}
