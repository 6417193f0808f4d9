//! Database service for bank-statement-service.

use crate::models::{AvailabilityAccount, BankIdentity, BankStatement, BankStatementRow};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::stores::{BankDirectory, StatementFilter, StatementStore};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Rows per INSERT statement. 21 binds per row stays well under the
/// Postgres limit of 65535 parameters.
const INSERT_CHUNK_SIZE: usize = 1000;

const STATEMENT_COLUMNS: &str = "bank_statement_id, church_id, bank_id, bank_name, bank_tag, \
     availability_account_id, availability_account_name, posted_at, amount, description, \
     direction, fit_id, hash, month, year, reconciliation_status, financial_record_id, \
     reconciled_at, raw, created_at, updated_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "bank-statement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn push_statement_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &StatementFilter) {
    builder.push(" WHERE church_id = ");
    builder.push_bind(filter.church_id.clone());

    if let Some(bank_id) = &filter.bank_id {
        builder.push(" AND bank_id = ");
        builder.push_bind(bank_id.clone());
    }
    if let Some(account_id) = &filter.availability_account_id {
        builder.push(" AND availability_account_id = ");
        builder.push_bind(account_id.clone());
    }
    if let Some(status) = filter.status {
        builder.push(" AND reconciliation_status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(month) = filter.month {
        builder.push(" AND month = ");
        builder.push_bind(month);
    }
    if let Some(year) = filter.year {
        builder.push(" AND year = ");
        builder.push_bind(year);
    }
    if let Some(from) = filter.posted_from {
        builder.push(" AND posted_at >= ");
        builder.push_bind(from);
    }
    if let Some(until) = filter.posted_until {
        builder.push(" AND posted_at < ");
        builder.push_bind(until);
    }
}

// =========================================================================
// Bank Statement Operations
// =========================================================================

#[async_trait]
impl StatementStore for Database {
    #[instrument(skip(self), fields(church_id = %church_id, bank_id = %bank_id))]
    async fn exists_by_fit_id(
        &self,
        church_id: &str,
        bank_id: &str,
        fit_id: &str,
    ) -> Result<bool, AppError> {
        if fit_id.is_empty() {
            return Ok(false);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["exists_by_fit_id"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bank_statements
                WHERE church_id = $1 AND bank_id = $2 AND fit_id = $3
            )
            "#,
        )
        .bind(church_id)
        .bind(bank_id)
        .bind(fit_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up fit_id: {}", e)))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self), fields(church_id = %church_id, bank_id = %bank_id))]
    async fn exists_by_hash(
        &self,
        church_id: &str,
        bank_id: &str,
        hash: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["exists_by_hash"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bank_statements
                WHERE church_id = $1 AND bank_id = $2 AND hash = $3
            )
            "#,
        )
        .bind(church_id)
        .bind(bank_id)
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up hash: {}", e)))?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self, statements), fields(count = statements.len()))]
    async fn insert_many(&self, statements: &[BankStatement]) -> Result<Vec<Uuid>, AppError> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_many"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut inserted = Vec::with_capacity(statements.len());
        for chunk in statements.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO bank_statements ({}) ", STATEMENT_COLUMNS));

            builder.push_values(chunk, |mut row, s| {
                row.push_bind(s.bank_statement_id)
                    .push_bind(s.church_id.clone())
                    .push_bind(s.bank.bank_id.clone())
                    .push_bind(s.bank.name.clone())
                    .push_bind(s.bank.tag.clone())
                    .push_bind(s.availability_account.availability_account_id.clone())
                    .push_bind(s.availability_account.account_name.clone())
                    .push_bind(s.posted_at)
                    .push_bind(s.amount)
                    .push_bind(s.description.clone())
                    .push_bind(s.direction.as_str())
                    .push_bind(s.fit_id.clone())
                    .push_bind(s.hash.clone())
                    .push_bind(s.month)
                    .push_bind(s.year)
                    .push_bind(s.status().as_str())
                    .push_bind(s.financial_record_id().map(str::to_string))
                    .push_bind(s.reconciled_at())
                    .push_bind(sqlx::types::Json(s.raw.clone()))
                    .push_bind(s.created_at)
                    .push_bind(s.updated_at);
            });
            builder.push(" ON CONFLICT DO NOTHING RETURNING bank_statement_id");

            let ids: Vec<Uuid> = builder
                .build_query_scalar::<Uuid>()
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to insert statements: {}", e))
                })?;
            inserted.extend(ids);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        debug!(
            requested = statements.len(),
            inserted = inserted.len(),
            "Bank statements inserted"
        );

        Ok(inserted)
    }

    #[instrument(skip(self), fields(church_id = %church_id, bank_statement_id = %bank_statement_id))]
    async fn find_by_id(
        &self,
        church_id: &str,
        bank_statement_id: Uuid,
    ) -> Result<Option<BankStatement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_statement_by_id"])
            .start_timer();

        let row = sqlx::query_as::<_, BankStatementRow>(&format!(
            "SELECT {} FROM bank_statements WHERE church_id = $1 AND bank_statement_id = $2",
            STATEMENT_COLUMNS
        ))
        .bind(church_id)
        .bind(bank_statement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get statement: {}", e)))?;

        timer.observe_duration();

        row.map(BankStatement::try_from).transpose()
    }

    #[instrument(skip(self, statement), fields(bank_statement_id = %statement.bank_statement_id, status = %statement.status()))]
    async fn update_reconciliation(&self, statement: &BankStatement) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_reconciliation"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE bank_statements
            SET reconciliation_status = $3, financial_record_id = $4, reconciled_at = $5, updated_at = $6
            WHERE church_id = $1 AND bank_statement_id = $2
            "#,
        )
        .bind(&statement.church_id)
        .bind(statement.bank_statement_id)
        .bind(statement.status().as_str())
        .bind(statement.financial_record_id())
        .bind(statement.reconciled_at())
        .bind(statement.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update reconciliation: {}", e))
        })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Bank statement {} not found",
                statement.bank_statement_id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self, filter), fields(church_id = %filter.church_id))]
    async fn list(
        &self,
        filter: &StatementFilter,
        page_size: i32,
        page_token: Option<Uuid>,
    ) -> Result<(Vec<BankStatement>, Option<String>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_statements"])
            .start_timer();

        let limit = page_size.clamp(1, 100) as i64;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM bank_statements", STATEMENT_COLUMNS));
        push_statement_filter(&mut builder, filter);
        if let Some(cursor) = page_token {
            builder.push(
                " AND (posted_at, bank_statement_id) > \
                 (SELECT posted_at, bank_statement_id FROM bank_statements WHERE bank_statement_id = ",
            );
            builder.push_bind(cursor);
            builder.push(")");
        }
        builder.push(" ORDER BY posted_at, bank_statement_id LIMIT ");
        builder.push_bind(limit + 1);

        let rows: Vec<BankStatementRow> = builder
            .build_query_as::<BankStatementRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list statements: {}", e))
            })?;

        timer.observe_duration();

        let has_more = rows.len() > limit as usize;
        let mut statements = rows
            .into_iter()
            .map(BankStatement::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if has_more {
            statements.pop();
        }
        let next_token = if has_more {
            statements.last().map(|s| s.bank_statement_id.to_string())
        } else {
            None
        };

        Ok((statements, next_token))
    }
}

// =========================================================================
// Bank Directory Operations
// =========================================================================

#[async_trait]
impl BankDirectory for Database {
    #[instrument(skip(self), fields(bank_id = %bank_id))]
    async fn find_bank(&self, bank_id: &str) -> Result<Option<BankIdentity>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_bank"])
            .start_timer();

        let bank = sqlx::query_as::<_, BankIdentity>(
            r#"
            SELECT bank_id, church_id, name, tag, availability_account_id
            FROM banks
            WHERE bank_id = $1
            "#,
        )
        .bind(bank_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bank: {}", e)))?;

        timer.observe_duration();
        Ok(bank)
    }

    #[instrument(skip(self), fields(church_id = %church_id, availability_account_id = %availability_account_id))]
    async fn find_availability_account(
        &self,
        church_id: &str,
        availability_account_id: &str,
    ) -> Result<Option<AvailabilityAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_availability_account"])
            .start_timer();

        let account = sqlx::query_as::<_, AvailabilityAccount>(
            r#"
            SELECT availability_account_id, church_id, account_name
            FROM availability_accounts
            WHERE church_id = $1 AND availability_account_id = $2
            "#,
        )
        .bind(church_id)
        .bind(availability_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get availability account: {}", e))
        })?;

        timer.observe_duration();
        Ok(account)
    }
}
