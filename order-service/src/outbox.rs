use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{MessagingConfig, OrderEvent, OrderEventType};
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::EventPublisher;
use crate::error::CollaboratorError;
use crate::models::*;
use crate::postgres::DbPool;
use crate::schema::*;

/// Event publisher that appends to the `outbox_events` table; the
/// `OutboxProcessor` relays rows to the broker.
#[derive(Clone)]
pub struct OutboxPublisher {
    pool: DbPool,
}

impl OutboxPublisher {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventPublisher for OutboxPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), CollaboratorError> {
        let row = NewOutboxEvent::try_from(event)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        diesel::insert_into(outbox_events::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Destination for relayed outbox rows.
#[async_trait]
pub trait OutboxSink: Send + Sync {
    async fn deliver(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}

#[async_trait]
impl OutboxSink for FutureProducer {
    async fn deliver(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(topic).payload(payload).key(key);
        self.send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

/// Delivers `pending` in order and returns the ids that can be marked
/// processed. Delivery stops at the first failure so later events for the
/// same order never overtake it; rows with an unknown type are skipped.
pub async fn relay_batch(
    sink: &dyn OutboxSink,
    messaging: &MessagingConfig,
    pending: &[DbOutboxEvent],
) -> Vec<Uuid> {
    let mut done = Vec::with_capacity(pending.len());
    for event in pending {
        let Some(event_type) = OrderEventType::parse(&event.event_type) else {
            warn!(event_id = %event.id, event_type = %event.event_type, "skipping unknown outbox event type");
            done.push(event.id);
            continue;
        };
        let topic = messaging.topic_for(event_type);
        let delivered = match serde_json::to_string(&event.event_data) {
            Ok(payload) => {
                sink.deliver(&topic, &event.aggregate_id.to_string(), &payload)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = delivered {
            error!(event_id = %event.id, %topic, "Failed to publish outbox event: {}", e);
            break;
        }
        info!(event_id = %event.id, event_type = %event.event_type, %topic, "Published outbox event");
        done.push(event.id);
    }
    done
}

pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    messaging: MessagingConfig,
    poll_interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        pool: DbPool,
        producer: FutureProducer,
        messaging: MessagingConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            producer,
            messaging,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            match self.relay_pending().await {
                Ok(0) => {}
                Ok(relayed) => debug!(relayed, "outbox batch relayed"),
                Err(e) => error!("Error relaying outbox events: {}", e),
            }
        }
    }

    /// Relays pending rows oldest first. A row is marked processed only after
    /// the broker acknowledged it, so delivery is at-least-once.
    pub async fn relay_pending(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(100)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        let done = relay_batch(&self.producer, &self.messaging, &pending).await;
        if done.is_empty() {
            return Ok(0);
        }
        diesel::update(outbox_events::table.filter(outbox_events::id.eq_any(done.clone())))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;

        Ok(done.len())
    }
}
