//! PostgreSQL ledger store.

use super::{LedgerStore, NewJournalEntry, StoreCapabilities};
use crate::models::{ChartAccount, JournalEntry, JournalEntryLine, JournalLine, NewAccount, period_of};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::Utc;
use gateway_core::idempotency::Finalize;
use gateway_core::GatewayError;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "entry_id, entry_no, period, source_module, source_model, source_id, entry_type, status, locked, entry_date, description, idempotency_key, reverses_entry_id, created_by, created_utc";

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the ledger migrations.
    pub async fn run_migrations(&self) -> Result<(), GatewayError> {
        info!("Running ledger migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        Ok(())
    }

    async fn entry_by_key(&self, key: &str) -> Result<Option<JournalEntry>, GatewayError> {
        sqlx::query_as::<_, JournalEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to fetch entry: {}", e)))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities { row_locks: true }
    }

    #[instrument(skip(self, account, finalize), fields(code = %account.code))]
    async fn create_account(
        &self,
        account: &NewAccount,
        finalize: Option<Finalize>,
    ) -> Result<ChartAccount, GatewayError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let created = sqlx::query_as::<_, ChartAccount>(
            r#"
            INSERT INTO chart_accounts (account_id, code, name, account_type, active, created_utc)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            RETURNING account_id, code, name, account_type, active, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(anyhow::anyhow!(
                    "Account with code '{}' already exists",
                    account.code
                ))
            }
            _ => GatewayError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)),
        })?;

        if let Some(finalize) = &finalize {
            apply_finalize(&mut tx, finalize).await?;
        }

        tx.commit().await.map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(account_id = %created.account_id, code = %created.code, "Account created");

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn account_by_code(&self, code: &str) -> Result<Option<ChartAccount>, GatewayError> {
        sqlx::query_as::<_, ChartAccount>(
            "SELECT account_id, code, name, account_type, active, created_utc FROM chart_accounts WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to fetch account: {}", e)))
    }

    #[instrument(skip(self, entry, lines, finalize), fields(entry_id = %entry.entry_id, line_count = lines.len()))]
    async fn insert_entry(
        &self,
        entry: &NewJournalEntry,
        lines: &[JournalLine],
        finalize: Option<Finalize>,
    ) -> Result<JournalEntry, GatewayError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_entry"])
            .start_timer();

        let period = period_of(entry.entry_date);

        let mut tx = self.pool.begin().await.map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Gapless numbering: the period counter row serializes allocators.
        sqlx::query(
            "INSERT INTO journal_periods (period, last_entry_no) VALUES ($1, 0) ON CONFLICT (period) DO NOTHING",
        )
        .bind(&period)
        .execute(&mut *tx)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to seed period: {}", e)))?;

        let last_no: i64 = sqlx::query_scalar(
            "SELECT last_entry_no FROM journal_periods WHERE period = $1 FOR UPDATE",
        )
        .bind(&period)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to lock period counter: {}", e))
        })?;

        let entry_no = last_no + 1;
        sqlx::query("UPDATE journal_periods SET last_entry_no = $2 WHERE period = $1")
            .bind(&period)
            .bind(entry_no)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                GatewayError::DatabaseError(anyhow::anyhow!("Failed to advance period counter: {}", e))
            })?;

        let inserted = sqlx::query_as::<_, JournalEntry>(&format!(
            r#"
            INSERT INTO journal_entries
                (entry_id, entry_no, period, source_module, source_model, source_id, entry_type,
                 status, locked, entry_date, description, idempotency_key, reverses_entry_id,
                 created_by, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'posted', TRUE, $8, $9, $10, $11, $12, $13)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.entry_id)
        .bind(entry_no)
        .bind(&period)
        .bind(&entry.source_module)
        .bind(&entry.source_model)
        .bind(&entry.source_id)
        .bind(&entry.entry_type)
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(&entry.idempotency_key)
        .bind(entry.reverses_entry_id)
        .bind(&entry.created_by)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Idempotency-key race: another writer won; return its entry.
                tx.rollback().await.ok();
                timer.observe_duration();
                return self.entry_by_key(&entry.idempotency_key).await?.ok_or_else(|| {
                    GatewayError::Conflict(anyhow::anyhow!(
                        "Duplicate idempotency key '{}'",
                        entry.idempotency_key
                    ))
                });
            }
            Err(e) => {
                return Err(GatewayError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert entry: {}",
                    e
                )));
            }
        };

        for (i, line) in lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO journal_entry_lines (line_id, entry_id, line_no, account_code, amount, direction)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(inserted.entry_id)
            .bind((i + 1) as i32)
            .bind(&line.account_code)
            .bind(line.amount)
            .bind(line.direction.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                GatewayError::DatabaseError(anyhow::anyhow!("Failed to insert line: {}", e))
            })?;
        }

        if let Some(finalize) = &finalize {
            apply_finalize(&mut tx, finalize).await?;
        }

        tx.commit().await.map_err(|e| {
            GatewayError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            entry_id = %inserted.entry_id,
            entry_no = inserted.entry_no,
            period = %inserted.period,
            "Journal entry posted"
        );

        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn entry(&self, entry_id: Uuid) -> Result<Option<JournalEntry>, GatewayError> {
        sqlx::query_as::<_, JournalEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE entry_id = $1"
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to fetch entry: {}", e)))
    }

    #[instrument(skip(self))]
    async fn entry_lines(&self, entry_id: Uuid) -> Result<Vec<JournalEntryLine>, GatewayError> {
        sqlx::query_as::<_, JournalEntryLine>(
            r#"
            SELECT line_id, entry_id, line_no, account_code, amount, direction
            FROM journal_entry_lines
            WHERE entry_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to fetch lines: {}", e)))
    }

    #[instrument(skip(self))]
    async fn account_net(&self, code: &str) -> Result<Decimal, GatewayError> {
        let net: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                SUM(CASE WHEN direction = 'debit' THEN amount ELSE -amount END),
                0
            )
            FROM journal_entry_lines
            WHERE account_code = $1
            "#,
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to get net: {}", e)))?;

        Ok(net.unwrap_or(Decimal::ZERO))
    }
}

/// Complete the governing idempotency record inside the business
/// transaction so the key commits together with its result.
async fn apply_finalize(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    finalize: &Finalize,
) -> Result<(), GatewayError> {
    sqlx::query(
        "UPDATE idempotency_records SET status = 'completed', result_data = $2 WHERE record_id = $1",
    )
    .bind(finalize.record_id)
    .bind(&finalize.result)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        GatewayError::DatabaseError(anyhow::anyhow!("Failed to finalize idempotency: {}", e))
    })?;
    Ok(())
}
