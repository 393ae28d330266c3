use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions};
use tracing::{debug, info};

use super::AttendanceStore;
use crate::{
    domain::{AttendanceRecord, RollNumber},
    error::StoreError,
};

/// Rows per INSERT statement. Five binds per row keeps each statement far
/// below the protocol's 65535 parameter limit.
const ROWS_PER_STATEMENT: usize = 1000;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct PostgresAttendanceStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresAttendanceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresAttendanceStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresAttendanceStore {
    /// Build the pool without opening a connection. Connections are made on
    /// first use, so an unreachable server surfaces as a transient error on
    /// the first query rather than at startup.
    pub fn connect_lazy(
        database_url: &str,
        settings: &PoolSettings,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .test_before_acquire(true)
            .connect_lazy(database_url)
            .map_err(|e| {
                StoreError::Query(format!("Invalid database URL: {e}"))
            })?;

        info!(
            max_connections = settings.max_connections,
            "Database pool initialized"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for PostgresAttendanceStore {
    async fn resolve_names(
        &self,
        rolls: &[RollNumber],
    ) -> Result<HashMap<RollNumber, String>, StoreError> {
        if rolls.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<&str> = rolls.iter().map(RollNumber::as_str).collect();
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT roll_no, name
            FROM students
            WHERE roll_no = ANY($1)
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        let found: HashMap<String, String> = rows.into_iter().collect();
        debug!(requested = rolls.len(), found = found.len(), "Resolved names");

        Ok(rolls
            .iter()
            .filter_map(|roll| {
                found
                    .get(roll.as_str())
                    .map(|name| (roll.clone(), name.clone()))
            })
            .collect())
    }

    async fn upsert_batch(
        &self,
        records: &[AttendanceRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO attendance (roll_no, name, class_id, date, time) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.roll_number.as_str())
                    .push_bind(record.display_name.as_str())
                    .push_bind(record.class_id.as_str())
                    .push_bind(record.date)
                    .push_bind(record.time);
            });
            builder.push(
                r#"
                ON CONFLICT (roll_no, date, class_id)
                DO UPDATE SET name = EXCLUDED.name, time = EXCLUDED.time
                "#,
            );

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
