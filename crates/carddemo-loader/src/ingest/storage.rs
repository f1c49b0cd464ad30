//! PostgreSQL store
//!
//! One chunk is one database transaction: isolation level and statement
//! timeout are set first, then one multi-row `INSERT` per target table.
//! Statements are split only to stay under the bind-parameter limit.
//! Driver errors are classified into [`PersistenceError`] by SQLSTATE.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::jobs::{JobLedger, JobStatus};
use super::loader::{ChunkStore, PartitionKey, TransactionOptions, TRANSACTIONS_TABLE};
use super::models::{
    AccountRecord, CardRecord, CardXrefRecord, PersistableRow, ResolvedTransaction,
    TransactionCategoryRecord, TransactionTypeRecord, ValidationOutcome,
};
use super::pipeline::BatchSummary;
use super::reference::ReferenceCodeLookup;
use super::resolver::{AccountLookup, AccountRef, CardLookup, CardRef};
use crate::error::PersistenceError;

/// PostgreSQL accepts at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Keeps partition advisory locks apart from other users of the lock space
const PARTITION_LOCK_NAMESPACE: i64 = 0x4344_0000_0000;

fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns).max(1)
}

fn db_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Default)]
struct RowsByTable<'a> {
    transaction_types: Vec<&'a TransactionTypeRecord>,
    transaction_categories: Vec<&'a TransactionCategoryRecord>,
    accounts: Vec<&'a AccountRecord>,
    cards: Vec<&'a CardRecord>,
    card_xrefs: Vec<&'a CardXrefRecord>,
    transactions: Vec<&'a ResolvedTransaction>,
}

impl<'a> RowsByTable<'a> {
    fn split(rows: &'a [PersistableRow]) -> Self {
        let mut tables = Self::default();
        for row in rows {
            match row {
                PersistableRow::TransactionType(r) => tables.transaction_types.push(r),
                PersistableRow::TransactionCategory(r) => tables.transaction_categories.push(r),
                PersistableRow::Account(r) => tables.accounts.push(r),
                PersistableRow::Card(r) => tables.cards.push(r),
                PersistableRow::CardXref(r) => tables.card_xrefs.push(r),
                PersistableRow::Transaction(r) => tables.transactions.push(r),
            }
        }
        tables
    }
}

/// Persistence ports backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_transaction_types(
        conn: &mut PgConnection,
        rows: &[&TransactionTypeRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(2)) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO transaction_types (type_code, description) ");
            qb.push_values(batch, |mut b, r| {
                b.push_bind(&r.type_code).push_bind(&r.description);
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_transaction_categories(
        conn: &mut PgConnection,
        rows: &[&TransactionCategoryRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(3)) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO transaction_categories (type_code, category_code, description) ",
            );
            qb.push_values(batch, |mut b, r| {
                b.push_bind(&r.type_code)
                    .push_bind(&r.category_code)
                    .push_bind(&r.description);
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_accounts(
        conn: &mut PgConnection,
        rows: &[&AccountRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(12)) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO accounts (account_id, active_status, current_balance, credit_limit, \
                 cash_credit_limit, open_date, expiration_date, reissue_date, \
                 current_cycle_credit, current_cycle_debit, address_zip, group_id) ",
            );
            qb.push_values(batch, |mut b, r| {
                b.push_bind(&r.account_id)
                    .push_bind(r.active)
                    .push_bind(&r.current_balance)
                    .push_bind(&r.credit_limit)
                    .push_bind(&r.cash_credit_limit)
                    .push_bind(r.open_date)
                    .push_bind(r.expiration_date)
                    .push_bind(r.reissue_date)
                    .push_bind(&r.current_cycle_credit)
                    .push_bind(&r.current_cycle_debit)
                    .push_bind(r.address_zip.as_deref())
                    .push_bind(r.group_id.as_deref());
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_cards(
        conn: &mut PgConnection,
        rows: &[&CardRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(6)) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO cards (card_number, account_id, cvv, embossed_name, \
                 expiration_date, active_status) ",
            );
            qb.push_values(batch, |mut b, r| {
                b.push_bind(&r.card_number)
                    .push_bind(&r.account_id)
                    .push_bind(&r.cvv)
                    .push_bind(&r.embossed_name)
                    .push_bind(r.expiration_date)
                    .push_bind(r.active);
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_card_xrefs(
        conn: &mut PgConnection,
        rows: &[&CardXrefRecord],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(3)) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO card_xref (card_number, customer_id, account_id) ");
            qb.push_values(batch, |mut b, r| {
                b.push_bind(&r.card_number)
                    .push_bind(&r.customer_id)
                    .push_bind(&r.account_id);
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_transactions(
        conn: &mut PgConnection,
        rows: &[&ResolvedTransaction],
    ) -> Result<u64, PersistenceError> {
        let mut inserted = 0;
        for batch in rows.chunks(rows_per_statement(15)) {
            // the partitioned table cannot enforce id uniqueness on its own
            let mut ids: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO transaction_ids (transaction_id) ");
            ids.push_values(batch, |mut b, t| {
                b.push_bind(&t.record.transaction_id);
            });
            ids.build().execute(&mut *conn).await?;

            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO transactions (transaction_id, type_code, category_code, source, \
                 description, amount, merchant_id, merchant_name, merchant_city, merchant_zip, \
                 card_number, account_id, customer_id, original_ts, processed_ts) ",
            );
            qb.push_values(batch, |mut b, t| {
                let r = &t.record;
                b.push_bind(&r.transaction_id)
                    .push_bind(&r.type_code)
                    .push_bind(&r.category_code)
                    .push_bind(r.source.as_deref())
                    .push_bind(r.description.as_deref())
                    .push_bind(&r.amount)
                    .push_bind(r.merchant_id.as_deref())
                    .push_bind(&r.merchant_name)
                    .push_bind(r.merchant_city.as_deref())
                    .push_bind(r.merchant_zip.as_deref())
                    .push_bind(&r.card_number)
                    .push_bind(&t.account_id)
                    .push_bind(t.customer_id.as_deref())
                    .push_bind(r.original_timestamp)
                    .push_bind(r.processed_timestamp);
            });
            inserted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl ChunkStore for PgStore {
    async fn partition_exists(&self, key: PartitionKey) -> Result<bool, PersistenceError> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(key.table_name())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_partition(&self, key: PartitionKey) -> Result<bool, PersistenceError> {
        let table = key.table_name();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PARTITION_LOCK_NAMESPACE + key.ordinal())
            .execute(&mut *tx)
            .await?;

        let existed: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&table)
            .fetch_one(&mut *tx)
            .await?;

        if !existed {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ('{}') TO ('{}')",
                table,
                TRANSACTIONS_TABLE,
                key.lower_bound(),
                key.upper_bound()
            );
            sqlx::query(&ddl).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(!existed)
    }

    async fn insert_chunk(
        &self,
        rows: &[PersistableRow],
        options: &TransactionOptions,
    ) -> Result<u64, PersistenceError> {
        let tables = RowsByTable::split(rows);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            options.timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let mut inserted = 0;
        if !tables.transaction_types.is_empty() {
            inserted += Self::insert_transaction_types(&mut *tx, &tables.transaction_types).await?;
        }
        if !tables.transaction_categories.is_empty() {
            inserted +=
                Self::insert_transaction_categories(&mut *tx, &tables.transaction_categories)
                    .await?;
        }
        if !tables.accounts.is_empty() {
            inserted += Self::insert_accounts(&mut *tx, &tables.accounts).await?;
        }
        if !tables.cards.is_empty() {
            inserted += Self::insert_cards(&mut *tx, &tables.cards).await?;
        }
        if !tables.card_xrefs.is_empty() {
            inserted += Self::insert_card_xrefs(&mut *tx, &tables.card_xrefs).await?;
        }
        if !tables.transactions.is_empty() {
            inserted += Self::insert_transactions(&mut *tx, &tables.transactions).await?;
        }

        tx.commit().await?;
        debug!(rows = inserted, "Committed chunk transaction");
        Ok(inserted)
    }
}

#[async_trait]
impl CardLookup for PgStore {
    async fn find_card(&self, card_number: &str) -> Result<Option<CardRef>, PersistenceError> {
        let row: Option<(String, String, bool, Option<String>)> = sqlx::query_as(
            "SELECT c.card_number, c.account_id, c.active_status, x.customer_id \
             FROM cards c LEFT JOIN card_xref x ON x.card_number = c.card_number \
             WHERE c.card_number = $1",
        )
        .bind(card_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(card_number, account_id, active, customer_id)| CardRef {
            card_number,
            account_id,
            active,
            customer_id,
        }))
    }
}

#[async_trait]
impl AccountLookup for PgStore {
    async fn find_account(&self, account_id: &str) -> Result<Option<AccountRef>, PersistenceError> {
        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT account_id, active_status FROM accounts WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(account_id, active)| AccountRef { account_id, active }))
    }
}

#[async_trait]
impl ReferenceCodeLookup for PgStore {
    async fn transaction_type_exists(&self, type_code: &str) -> Result<bool, PersistenceError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM transaction_types WHERE type_code = $1)",
        )
        .bind(type_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn transaction_category_exists(
        &self,
        type_code: &str,
        category_code: &str,
    ) -> Result<bool, PersistenceError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM transaction_categories \
             WHERE type_code = $1 AND category_code = $2)",
        )
        .bind(type_code)
        .bind(category_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl JobLedger for PgStore {
    async fn start_job(&self, job_name: &str) -> Result<Uuid, PersistenceError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO migration_jobs (id, job_name, status, started_at) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(id)
        .bind(job_name)
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn record_skips(
        &self,
        job_id: Uuid,
        outcomes: &[ValidationOutcome],
    ) -> Result<(), PersistenceError> {
        for batch in outcomes.chunks(rows_per_statement(8)) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO migration_skips (job_id, record_type, line_number, record_key, \
                 stage, category, error_kind, message) ",
            );
            qb.push_values(batch, |mut b, o| {
                b.push_bind(job_id)
                    .push_bind(o.record_ref.record_type.as_str())
                    .push_bind(db_int(o.record_ref.line_number))
                    .push_bind(o.record_ref.key.as_deref())
                    .push_bind(o.stage.as_str())
                    .push_bind(o.category.as_str())
                    .push_bind(&o.error_kind)
                    .push_bind(&o.message);
            });
            qb.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        summary: &BatchSummary,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            "UPDATE migration_jobs SET status = $2, completed_at = NOW(), total_seen = $3, \
             succeeded = $4, skipped = $5, failed_fatal = $6, summary = $7, error_message = $8 \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(db_int(summary.total_seen))
        .bind(db_int(summary.succeeded))
        .bind(db_int(summary.skipped))
        .bind(db_int(summary.failed_fatal))
        .bind(Json(summary))
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::Fatal(format!("unknown job {}", job_id)));
        }
        Ok(())
    }
}
