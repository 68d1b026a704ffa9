use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::*;
use crate::order::{Order, OrderStatus};
use crate::schema::*;
use crate::store::{NewReconciliationFlag, OrderStore, ReconciliationAction, ReconciliationFlag};

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, AsyncDieselConnectionManager<AsyncPgConnection>>, StoreError>
    {
        self.pool.get().await.map_err(StoreError::database)
    }

    async fn load_items(
        conn: &mut AsyncPgConnection,
        row: OrderRow,
    ) -> Result<Order, StoreError> {
        let items = OrderItemRow::belonging_to(&row)
            .select(OrderItemRow::as_select())
            .order(order_items::product_id.asc())
            .load(conn)
            .await?;
        row.into_order(items).map_err(StoreError::database)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> Result<Uuid, StoreError> {
        let mut conn = self.conn().await?;
        let new_order = NewOrderRow::from(order);
        let items = OrderItemRow::for_order(order);
        let order_id = order.id;

        let result = conn
            .transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    diesel::insert_into(orders::table)
                        .values(&new_order)
                        .execute(conn)
                        .await?;
                    diesel::insert_into(order_items::table)
                        .values(&items)
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Ok(()) => {
                info!(%order_id, "order persisted");
                Ok(order_id)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(StoreError::DuplicateOrder(order_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.conn().await?;
        let row = orders::table
            .find(order_id)
            .select(OrderRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        match row {
            Some(row) => Ok(Some(Self::load_items(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { order_id, from, to });
        }
        let mut conn = self.conn().await?;

        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::status.eq(from.as_str())),
        )
        .set((
            orders::status.eq(to.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(OrderRow::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        if let Some(row) = updated {
            debug!(%order_id, %from, %to, "order transitioned");
            return Self::load_items(&mut conn, row).await;
        }

        let actual = orders::table
            .find(order_id)
            .select(orders::status)
            .first::<String>(&mut conn)
            .await
            .optional()?
            .ok_or(StoreError::OrderNotFound(order_id))?;
        let actual = OrderStatus::parse(&actual)
            .ok_or_else(|| StoreError::database(format!("unknown order status {actual}")))?;
        Err(StoreError::StaleTransition {
            order_id,
            expected: from,
            actual,
            to,
        })
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.conn().await?;
        let rows = orders::table
            .filter(orders::status.eq(OrderStatus::Pending.as_str()))
            .filter(orders::order_time.lt(cutoff))
            .order(orders::order_time.asc())
            .limit(limit)
            .select(OrderRow::as_select())
            .load(&mut conn)
            .await?;

        let items = OrderItemRow::belonging_to(&rows)
            .select(OrderItemRow::as_select())
            .load(&mut conn)
            .await?;

        items
            .grouped_by(&rows)
            .into_iter()
            .zip(rows)
            .map(|(items, row)| row.into_order(items).map_err(StoreError::database))
            .collect()
    }

    async fn flag_for_reconciliation(&self, flag: NewReconciliationFlag) -> Result<Uuid, StoreError> {
        let mut conn = self.conn().await?;
        let row = NewReconciliationFlagRow {
            id: Uuid::new_v4(),
            order_id: flag.order_id,
            action: flag.action.as_str().to_string(),
            product_id: flag.product_id,
            quantity: flag.quantity,
            reason: flag.reason,
        };

        let inserted = diesel::insert_into(reconciliation_flags::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        if inserted == 1 {
            return Ok(row.id);
        }

        // An identical flag is already open.
        reconciliation_flags::table
            .filter(reconciliation_flags::order_id.eq(row.order_id))
            .filter(reconciliation_flags::action.eq(&row.action))
            .filter(reconciliation_flags::product_id.eq(row.product_id))
            .filter(reconciliation_flags::resolved.eq(false))
            .select(reconciliation_flags::id)
            .first::<Uuid>(&mut conn)
            .await
            .map_err(StoreError::from)
    }

    async fn open_reconciliation_flags(
        &self,
        actions: &[ReconciliationAction],
        limit: i64,
    ) -> Result<Vec<ReconciliationFlag>, StoreError> {
        let actions: Vec<&str> = actions.iter().map(ReconciliationAction::as_str).collect();
        let mut conn = self.conn().await?;
        reconciliation_flags::table
            .filter(reconciliation_flags::resolved.eq(false))
            .filter(reconciliation_flags::action.eq_any(actions))
            .order(reconciliation_flags::created_at.asc())
            .limit(limit)
            .select(ReconciliationFlagRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(|row| row.into_flag().map_err(StoreError::database))
            .collect()
    }

    async fn resolve_reconciliation_flag(&self, flag_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::update(reconciliation_flags::table.find(flag_id))
            .set((
                reconciliation_flags::resolved.eq(true),
                reconciliation_flags::resolved_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
