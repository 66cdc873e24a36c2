use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{ApplyOutcome, LedgerEntry, LedgerPage, NewLedgerEntry};

const ENTRY_COLUMNS: &str =
    "seq, id, company_id, amount, entry_type, description, external_ref, created_at";
const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("company {company_id} has balance {balance}, cannot apply {amount}")]
    InsufficientBalance {
        company_id: Uuid,
        balance: i64,
        amount: i64,
    },
    #[error("company {0} not found")]
    CompanyNotFound(Uuid),
    #[error("ledger entries must carry a non-zero amount")]
    InvalidAmount,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// key: ledger-store -> atomic balance mutations
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry and move the cached balance in one transaction.
    pub async fn apply_entry(
        &self,
        company_id: Uuid,
        amount: i64,
        entry_type: super::EntryType,
        description: &str,
        external_ref: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entry = NewLedgerEntry::new(company_id, amount, entry_type, description);
        entry.external_ref = external_ref.map(str::to_string);
        Ok(self.apply(&entry).await?.into_entry())
    }

    pub async fn apply(&self, entry: &NewLedgerEntry) -> Result<ApplyOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let outcome = apply_in_tx(&mut tx, entry).await?;
        tx.commit().await?;
        if outcome.was_applied() {
            info!(
                company_id = %entry.company_id,
                amount = entry.amount,
                entry_type = entry.entry_type.as_str(),
                "ledger entry applied"
            );
        }
        Ok(outcome)
    }

    pub async fn current_balance(&self, company_id: Uuid) -> Result<i64, LedgerError> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::CompanyNotFound(company_id))
    }

    /// Balance recomputed from the entries rather than the cached column.
    pub async fn ledger_sum(&self, company_id: Uuid) -> Result<i64, LedgerError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    /// Oldest-first page of entries strictly after `cursor`.
    pub async fn entries_for(
        &self,
        company_id: Uuid,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<LedgerPage, LedgerError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE company_id = $1 AND seq > $2 \
             ORDER BY seq ASC LIMIT $3"
        ))
        .bind(company_id)
        .bind(cursor.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let next_cursor = if entries.len() as i64 == limit {
            entries.last().map(|entry| entry.seq)
        } else {
            None
        };
        Ok(LedgerPage {
            entries,
            next_cursor,
        })
    }

    pub async fn entry_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE external_ref = $1"
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }
}

/// Apply `entry` inside a caller-owned transaction.
///
/// The entry row is inserted first so a repeated external reference is
/// detected before the balance moves. The balance update is conditional on the
/// result staying non-negative; concurrent debits serialize on the company row
/// and the loser observes the committed balance. On `Err` the caller must roll
/// the transaction back.
pub async fn apply_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewLedgerEntry,
) -> Result<ApplyOutcome, LedgerError> {
    if entry.amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let inserted = sqlx::query_as::<_, LedgerEntry>(&format!(
        r#"
        INSERT INTO ledger_entries (id, company_id, amount, entry_type, description, external_ref)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (external_ref) WHERE external_ref IS NOT NULL DO NOTHING
        RETURNING {ENTRY_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(entry.company_id)
    .bind(entry.amount)
    .bind(entry.entry_type.as_str())
    .bind(&entry.description)
    .bind(&entry.external_ref)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| map_missing_company(err, entry.company_id))?;

    let Some(inserted) = inserted else {
        let existing = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE external_ref = $1"
        ))
        .bind(&entry.external_ref)
        .fetch_one(&mut *tx)
        .await?;
        debug!(
            company_id = %entry.company_id,
            external_ref = ?entry.external_ref,
            "ledger entry already applied"
        );
        return Ok(ApplyOutcome::AlreadyApplied(existing));
    };

    let updated: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE companies
        SET balance = balance + $2, updated_at = NOW()
        WHERE id = $1 AND balance + $2 >= 0
        RETURNING balance
        "#,
    )
    .bind(entry.company_id)
    .bind(entry.amount)
    .fetch_optional(&mut *tx)
    .await?;

    if updated.is_none() {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM companies WHERE id = $1")
                .bind(entry.company_id)
                .fetch_optional(&mut *tx)
                .await?;
        return Err(match balance {
            Some(balance) => LedgerError::InsufficientBalance {
                company_id: entry.company_id,
                balance,
                amount: entry.amount,
            },
            None => LedgerError::CompanyNotFound(entry.company_id),
        });
    }

    Ok(ApplyOutcome::Applied(inserted))
}

fn map_missing_company(err: sqlx::Error, company_id: Uuid) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some("ledger_entries_company_id_fkey") {
            return LedgerError::CompanyNotFound(company_id);
        }
    }
    LedgerError::Db(err)
}
