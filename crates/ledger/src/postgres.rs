use crate::error::LedgerError;
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    Anomaly, Correction, CycleOutcome, CycleRecord, Order, Position,
};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Establishes a connection pool to the PostgreSQL database.
///
/// Reads `DATABASE_URL` from the environment (or `.env`), creates a pool
/// with conservative settings, and returns it for the whole application to
/// share.
pub async fn connect() -> Result<PgPool, LedgerError> {
    dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_e| LedgerError::ConnectionConfigError("DATABASE_URL must be set.".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    Ok(pool)
}

/// Applies database migrations at startup so the schema is always current
/// before the first cycle runs.
pub async fn run_migrations(pool: &PgPool) -> Result<(), LedgerError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The production `LedgerStore`, backed by PostgreSQL.
///
/// All SQL lives here; the rest of the application only ever sees the
/// trait. Queries use the runtime-checked form so the build does not
/// require a live schema.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct PositionRow {
    position_id: Uuid,
    instrument: String,
    quantity: Decimal,
    entry_price: Decimal,
    current_value: Decimal,
    opened_at: DateTime<Utc>,
    status: String,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<PositionRow> for Position {
    type Error = LedgerError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(Position {
            position_id: row.position_id,
            instrument: row.instrument,
            quantity: row.quantity,
            entry_price: row.entry_price,
            current_value: row.current_value,
            opened_at: row.opened_at,
            status: FromStr::from_str(&row.status)
                .map_err(|e: &str| LedgerError::CorruptRow(e.to_string()))?,
            stop_loss: row.stop_loss,
            take_profit: row.take_profit,
            last_updated: row.last_updated,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    order_id: Uuid,
    position_id: Uuid,
    instrument: String,
    side: String,
    requested_qty: Decimal,
    limit_price: Option<Decimal>,
    submitted_at: DateTime<Utc>,
    status: String,
    filled_qty: Decimal,
    filled_avg_price: Option<Decimal>,
    retry_count: i32,
    idempotency_key: Uuid,
    cycle_seq: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = LedgerError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            order_id: row.order_id,
            position_id: row.position_id,
            instrument: row.instrument,
            side: FromStr::from_str(&row.side)
                .map_err(|e: &str| LedgerError::CorruptRow(e.to_string()))?,
            requested_qty: row.requested_qty,
            limit_price: row.limit_price,
            submitted_at: row.submitted_at,
            status: FromStr::from_str(&row.status)
                .map_err(|e: &str| LedgerError::CorruptRow(e.to_string()))?,
            filled_qty: row.filled_qty,
            filled_avg_price: row.filled_avg_price,
            retry_count: row.retry_count,
            idempotency_key: row.idempotency_key,
            cycle_seq: row.cycle_seq,
        })
    }
}

#[derive(FromRow)]
struct CycleRow {
    seq: i64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    decision_snapshot: Option<serde_json::Value>,
    order_ids: Vec<Uuid>,
    outcome: Option<String>,
}

impl TryFrom<CycleRow> for CycleRecord {
    type Error = LedgerError;

    fn try_from(row: CycleRow) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .as_deref()
            .map(CycleOutcome::from_str)
            .transpose()
            .map_err(|e| LedgerError::CorruptRow(e.to_string()))?;
        Ok(CycleRecord {
            seq: row.seq,
            started_at: row.started_at,
            ended_at: row.ended_at,
            decision_snapshot: row.decision_snapshot,
            order_ids: row.order_ids,
            outcome,
        })
    }
}

#[derive(FromRow)]
struct AnomalyRow {
    anomaly_id: Uuid,
    instrument: String,
    position_id: Option<Uuid>,
    reason: String,
    raised_at: DateTime<Utc>,
    cleared: bool,
}

impl From<AnomalyRow> for Anomaly {
    fn from(row: AnomalyRow) -> Self {
        Anomaly {
            anomaly_id: row.anomaly_id,
            instrument: row.instrument,
            position_id: row.position_id,
            reason: row.reason,
            raised_at: row.raised_at,
            cleared: row.cleared,
        }
    }
}

const POSITION_COLUMNS: &str = "position_id, instrument, quantity, entry_price, current_value, \
     opened_at, status, stop_loss, take_profit, last_updated";

const ORDER_COLUMNS: &str = "order_id, position_id, instrument, side, requested_qty, limit_price, \
     submitted_at, status, filled_qty, filled_avg_price, retry_count, idempotency_key, cycle_seq";

#[async_trait]
impl LedgerStore for PgLedger {
    async fn upsert_position(&self, position: &Position) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO positions (position_id, instrument, quantity, entry_price, current_value,
                                   opened_at, status, stop_loss, take_profit, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (position_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                entry_price = EXCLUDED.entry_price,
                current_value = EXCLUDED.current_value,
                status = EXCLUDED.status,
                stop_loss = EXCLUDED.stop_loss,
                take_profit = EXCLUDED.take_profit,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(position.position_id)
        .bind(&position.instrument)
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.current_value)
        .bind(position.opened_at)
        .bind(position.status.as_str())
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn live_position(&self, instrument: &str) -> Result<Option<Position>, LedgerError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE instrument = $1 AND status != 'closed' LIMIT 1"
        ))
        .bind(instrument)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Position::try_from).transpose()
    }

    async fn live_positions(&self) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE status != 'closed' ORDER BY instrument"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Position::try_from).collect()
    }

    async fn insert_order(&self, order: &Order) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, position_id, instrument, side, requested_qty, limit_price,
                                submitted_at, status, filled_qty, filled_avg_price, retry_count,
                                idempotency_key, cycle_seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.order_id)
        .bind(order.position_id)
        .bind(&order.instrument)
        .bind(order.side.as_str())
        .bind(order.requested_qty)
        .bind(order.limit_price)
        .bind(order.submitted_at)
        .bind(order.status.as_str())
        .bind(order.filled_qty)
        .bind(order.filled_avg_price)
        .bind(order.retry_count)
        .bind(order.idempotency_key)
        .bind(order.cycle_seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                filled_qty = $3,
                filled_avg_price = $4,
                retry_count = $5
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .bind(order.status.as_str())
        .bind(order.filled_qty)
        .bind(order.filled_avg_price)
        .bind(order.retry_count)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound);
        }
        Ok(())
    }

    async fn unresolved_orders(&self) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'unknown' ORDER BY submitted_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn orders_for_cycle(&self, seq: i64) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE cycle_seq = $1 ORDER BY submitted_at"
        ))
        .bind(seq)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn begin_cycle(&self, started_at: DateTime<Utc>) -> Result<CycleRecord, LedgerError> {
        // The MAX(seq)+1 subselect keeps sequence numbers gap-free; only one
        // scheduler instance can hold the cycle lease, so there is no
        // competing inserter.
        let row = sqlx::query_as::<_, CycleRow>(
            r#"
            INSERT INTO cycles (seq, started_at)
            SELECT COALESCE(MAX(seq), 0) + 1, $1 FROM cycles
            RETURNING seq, started_at, ended_at, decision_snapshot, order_ids, outcome
            "#,
        )
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;
        CycleRecord::try_from(row)
    }

    async fn record_decision(
        &self,
        seq: i64,
        snapshot: serde_json::Value,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE cycles SET decision_snapshot = $2 WHERE seq = $1")
            .bind(seq)
            .bind(snapshot)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn attach_order(&self, seq: i64, order_id: Uuid) -> Result<(), LedgerError> {
        sqlx::query("UPDATE cycles SET order_ids = array_append(order_ids, $2) WHERE seq = $1")
            .bind(seq)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seal_cycle(&self, seq: i64, outcome: CycleOutcome) -> Result<(), LedgerError> {
        let result =
            sqlx::query("UPDATE cycles SET outcome = $2, ended_at = $3 WHERE seq = $1 AND outcome IS NULL")
                .bind(seq)
                .bind(outcome.as_str())
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound);
        }
        Ok(())
    }

    async fn last_cycle(&self) -> Result<Option<CycleRecord>, LedgerError> {
        let row = sqlx::query_as::<_, CycleRow>(
            "SELECT seq, started_at, ended_at, decision_snapshot, order_ids, outcome
             FROM cycles ORDER BY seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(CycleRecord::try_from).transpose()
    }

    async fn unsealed_cycle(&self) -> Result<Option<CycleRecord>, LedgerError> {
        let row = sqlx::query_as::<_, CycleRow>(
            "SELECT seq, started_at, ended_at, decision_snapshot, order_ids, outcome
             FROM cycles WHERE outcome IS NULL ORDER BY seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(CycleRecord::try_from).transpose()
    }

    async fn record_correction(&self, correction: &Correction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO corrections (correction_id, instrument, ledger_qty, venue_qty, action, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(correction.correction_id)
        .bind(&correction.instrument)
        .bind(correction.ledger_qty)
        .bind(correction.venue_qty)
        .bind(correction.action.as_str())
        .bind(correction.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO anomalies (anomaly_id, instrument, position_id, reason, raised_at, cleared)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(anomaly.anomaly_id)
        .bind(&anomaly.instrument)
        .bind(anomaly.position_id)
        .bind(&anomaly.reason)
        .bind(anomaly.raised_at)
        .bind(anomaly.cleared)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, LedgerError> {
        let rows = sqlx::query_as::<_, AnomalyRow>(
            "SELECT anomaly_id, instrument, position_id, reason, raised_at, cleared
             FROM anomalies WHERE cleared = FALSE ORDER BY raised_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Anomaly::from).collect())
    }

    async fn clear_anomaly(&self, anomaly_id: Uuid) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE anomalies SET cleared = TRUE WHERE anomaly_id = $1")
            .bind(anomaly_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound);
        }
        Ok(())
    }

    async fn acquire_lease(&self, owner: &str, ttl: Duration) -> Result<bool, LedgerError> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| LedgerError::CorruptRow(format!("lease ttl out of range: {e}")))?;
        // Single-row table; the WHERE clause on the upsert makes the steal
        // atomic: the row only changes hands when expired or already ours.
        let result = sqlx::query(
            r#"
            INSERT INTO cycle_lease (id, owner_id, expires_at)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                expires_at = EXCLUDED.expires_at
            WHERE cycle_lease.expires_at < $3 OR cycle_lease.owner_id = EXCLUDED.owner_id
            "#,
        )
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, owner: &str) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM cycle_lease WHERE owner_id = $1")
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
