//! Postgres-backed inventory ledger.
//!
//! Every mutation is a single conditional `UPDATE` whose predicate carries the
//! check (`available_quantity >= q`, `status = 'reserved'`), so concurrent
//! callers serialize on the row lock and never act on a stale read.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    validate_quantity, InventoryLedger, InventoryLevel, LedgerError, ReservationToken,
    ResolveOutcome,
};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Debug, Error)]
enum TxError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    /// Another request inserted the same `(order, product)` reservation while
    /// this one was in flight; the stock update is rolled back.
    #[error("concurrent duplicate reservation")]
    DuplicateReservation,
}

#[derive(Clone)]
pub struct PgInventoryLedger {
    pool: DbPool,
}

impl PgInventoryLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, AsyncDieselConnectionManager<AsyncPgConnection>>, LedgerError>
    {
        self.pool.get().await.map_err(LedgerError::unavailable)
    }

    /// Transitions an open reservation to `target` and returns its quantity,
    /// or `None` if it was not open.
    async fn close_reservation(
        conn: &mut AsyncPgConnection,
        token: &ReservationToken,
        target: ReservationStatus,
    ) -> Result<Option<i32>, diesel::result::Error> {
        diesel::update(
            reservations::table
                .find((token.order_id, token.product_id))
                .filter(reservations::status.eq(ReservationStatus::Reserved.as_str())),
        )
        .set((
            reservations::status.eq(target.as_str()),
            reservations::updated_at.eq(Utc::now()),
        ))
        .returning(reservations::quantity)
        .get_result::<i32>(conn)
        .await
        .optional()
    }

    /// Writes a `released` row for a key that was never reserved, so a reserve
    /// still in flight for it is refused when it lands. Returns `false` when a
    /// row for the key already exists.
    async fn record_release(
        conn: &mut AsyncPgConnection,
        token: &ReservationToken,
    ) -> Result<bool, diesel::result::Error> {
        if token.quantity <= 0 {
            return Ok(true);
        }
        let stocked = inventory::table
            .find(token.product_id)
            .select(inventory::product_id)
            .first::<Uuid>(conn)
            .await
            .optional()?
            .is_some();
        if !stocked {
            return Ok(true);
        }

        let inserted = diesel::insert_into(reservations::table)
            .values(&NewReservation {
                order_id: token.order_id,
                product_id: token.product_id,
                quantity: token.quantity,
                status: ReservationStatus::Released.as_str().to_string(),
            })
            .on_conflict((reservations::order_id, reservations::product_id))
            .do_nothing()
            .execute(conn)
            .await?;
        if inserted > 0 {
            debug!(order_id = %token.order_id, product_id = %token.product_id, "release recorded ahead of reservation");
        }
        Ok(inserted > 0)
    }
}

fn existing_token(reservation: Reservation) -> Result<ReservationToken, LedgerError> {
    if reservation.status == ReservationStatus::Reserved.as_str() {
        Ok(reservation.token())
    } else {
        Err(LedgerError::ReservationResolved {
            order_id: reservation.order_id,
            product_id: reservation.product_id,
            status: reservation.status,
        })
    }
}

impl From<TxError> for LedgerError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Ledger(e) => e,
            other => LedgerError::unavailable(other),
        }
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReservationToken, LedgerError> {
        validate_quantity(quantity)?;
        let mut conn = self.conn().await?;

        let existing = reservations::table
            .find((order_id, product_id))
            .first::<Reservation>(&mut conn)
            .await
            .optional()
            .map_err(LedgerError::unavailable)?;
        if let Some(reservation) = existing {
            debug!(%order_id, %product_id, "reservation already recorded");
            return existing_token(reservation);
        }

        let result = conn
            .transaction::<_, TxError, _>(|conn| {
                Box::pin(async move {
                    let updated = diesel::update(
                        inventory::table
                            .filter(inventory::product_id.eq(product_id))
                            .filter(inventory::available_quantity.ge(quantity)),
                    )
                    .set((
                        inventory::available_quantity.eq(inventory::available_quantity - quantity),
                        inventory::reserved_quantity.eq(inventory::reserved_quantity + quantity),
                        inventory::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                    if updated == 0 {
                        let available = inventory::table
                            .find(product_id)
                            .select(inventory::available_quantity)
                            .first::<i32>(conn)
                            .await
                            .optional()?;
                        let err = match available {
                            None => LedgerError::ProductNotFound { product_id },
                            Some(available) => LedgerError::InsufficientStock {
                                product_id,
                                requested: quantity,
                                available,
                            },
                        };
                        return Err(err.into());
                    }

                    let inserted = diesel::insert_into(reservations::table)
                        .values(&NewReservation {
                            order_id,
                            product_id,
                            quantity,
                            status: ReservationStatus::Reserved.as_str().to_string(),
                        })
                        .on_conflict((reservations::order_id, reservations::product_id))
                        .do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 0 {
                        return Err(TxError::DuplicateReservation);
                    }

                    Ok(ReservationToken {
                        order_id,
                        product_id,
                        quantity,
                    })
                })
            })
            .await;

        match result {
            Ok(token) => {
                info!(%order_id, %product_id, quantity, "stock reserved");
                Ok(token)
            }
            Err(TxError::DuplicateReservation) => {
                let reservation = reservations::table
                    .find((order_id, product_id))
                    .first::<Reservation>(&mut conn)
                    .await
                    .map_err(LedgerError::unavailable)?;
                existing_token(reservation)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        let mut conn = self.conn().await?;
        let token = *token;

        let outcome = conn
            .transaction::<_, TxError, _>(|conn| {
                Box::pin(async move {
                    let mut closed =
                        Self::close_reservation(conn, &token, ReservationStatus::Released).await?;
                    if closed.is_none() && !Self::record_release(conn, &token).await? {
                        // A reserve committed between the two statements.
                        closed = Self::close_reservation(conn, &token, ReservationStatus::Released)
                            .await?;
                    }
                    let Some(quantity) = closed else {
                        return Ok(ResolveOutcome::AlreadyResolved);
                    };

                    diesel::update(inventory::table.find(token.product_id))
                        .set((
                            inventory::available_quantity
                                .eq(inventory::available_quantity + quantity),
                            inventory::reserved_quantity.eq(inventory::reserved_quantity - quantity),
                            inventory::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(ResolveOutcome::Applied)
                })
            })
            .await?;

        if outcome == ResolveOutcome::Applied {
            info!(order_id = %token.order_id, product_id = %token.product_id, "reservation released");
        }
        Ok(outcome)
    }

    async fn confirm_deduct(
        &self,
        token: &ReservationToken,
    ) -> Result<ResolveOutcome, LedgerError> {
        let mut conn = self.conn().await?;
        let token = *token;

        let outcome = conn
            .transaction::<_, TxError, _>(|conn| {
                Box::pin(async move {
                    let Some(quantity) =
                        Self::close_reservation(conn, &token, ReservationStatus::Confirmed).await?
                    else {
                        return Ok(ResolveOutcome::AlreadyResolved);
                    };

                    diesel::update(inventory::table.find(token.product_id))
                        .set((
                            inventory::reserved_quantity.eq(inventory::reserved_quantity - quantity),
                            inventory::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(ResolveOutcome::Applied)
                })
            })
            .await?;

        if outcome == ResolveOutcome::Applied {
            info!(order_id = %token.order_id, product_id = %token.product_id, "reservation confirmed");
        }
        Ok(outcome)
    }

    async fn restock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<InventoryLevel, LedgerError> {
        validate_quantity(quantity)?;
        let mut conn = self.conn().await?;

        let row = diesel::insert_into(inventory::table)
            .values(&NewInventory {
                product_id,
                available_quantity: quantity,
                reserved_quantity: 0,
            })
            .on_conflict(inventory::product_id)
            .do_update()
            .set((
                inventory::available_quantity.eq(inventory::available_quantity + quantity),
                inventory::updated_at.eq(Utc::now()),
            ))
            .returning(InventoryRow::as_returning())
            .get_result::<InventoryRow>(&mut conn)
            .await
            .map_err(LedgerError::unavailable)?;

        info!(%product_id, quantity, available = row.available_quantity, "stock received");
        Ok(row.into())
    }

    async fn level(&self, product_id: Uuid) -> Result<InventoryLevel, LedgerError> {
        let mut conn = self.conn().await?;
        inventory::table
            .find(product_id)
            .select(InventoryRow::as_select())
            .first::<InventoryRow>(&mut conn)
            .await
            .optional()
            .map_err(LedgerError::unavailable)?
            .map(InventoryLevel::from)
            .ok_or(LedgerError::ProductNotFound { product_id })
    }
}
