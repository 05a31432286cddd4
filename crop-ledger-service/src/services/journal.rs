//! Journal posting: the single path every entry takes into the ledger.

use super::error::map_unique_violation;
use super::metrics::{DB_QUERY_DURATION, JOURNAL_ENTRIES_TOTAL};
use super::{Database, LedgerError};
use crate::models::{
    validate_lines, AccountType, EntryStatus, JournalEntry, JournalLine, JournalLineInput,
    NewJournalEntry, SourceType,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "entry_id, entry_number, entry_date, description, status, source_type, source_id, reverses_entry_id, created_utc, posted_utc";

/// Filter for journal listings.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub account_id: Option<Uuid>,
}

/// Lock the accounts touched by `lines` in id order and check they can take postings.
async fn lock_accounts(
    conn: &mut PgConnection,
    lines: &[JournalLineInput],
    require_active: bool,
) -> Result<HashMap<Uuid, AccountType>, LedgerError> {
    let mut ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();
    ids.sort();
    ids.dedup();

    let rows: Vec<(Uuid, String, String, bool)> = sqlx::query_as(
        r#"
        SELECT account_id, code, account_type, is_active
        FROM accounts
        WHERE account_id = ANY($1)
        ORDER BY account_id
        FOR UPDATE
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut types = HashMap::with_capacity(rows.len());
    for (account_id, code, account_type, is_active) in rows {
        if require_active && !is_active {
            return Err(LedgerError::validation(format!(
                "Account {} is inactive and cannot take postings",
                code
            )));
        }
        let account_type = AccountType::try_from(account_type)
            .map_err(|e| LedgerError::Transaction(sqlx::Error::Decode(Box::new(e))))?;
        types.insert(account_id, account_type);
    }

    if let Some(missing) = ids.iter().find(|id| !types.contains_key(id)) {
        return Err(LedgerError::validation(format!(
            "Account {} does not exist",
            missing
        )));
    }
    Ok(types)
}

async fn check_contacts(
    conn: &mut PgConnection,
    lines: &[JournalLineInput],
) -> Result<(), LedgerError> {
    let mut ids: Vec<Uuid> = lines.iter().filter_map(|l| l.contact_id).collect();
    if ids.is_empty() {
        return Ok(());
    }
    ids.sort();
    ids.dedup();

    let found: Vec<Uuid> =
        sqlx::query_scalar("SELECT contact_id FROM contacts WHERE contact_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?;

    match ids.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(LedgerError::validation(format!(
            "Contact {} does not exist",
            missing
        ))),
        None => Ok(()),
    }
}

/// Add the normal-side effect of `lines` to the cached account balances.
async fn apply_balances(
    conn: &mut PgConnection,
    types: &HashMap<Uuid, AccountType>,
    lines: &[JournalLineInput],
) -> Result<(), LedgerError> {
    let mut sums: BTreeMap<Uuid, (Decimal, Decimal)> = BTreeMap::new();
    for line in lines {
        let entry = sums.entry(line.account_id).or_default();
        entry.0 += line.debit;
        entry.1 += line.credit;
    }

    for (account_id, (debit, credit)) in sums {
        let Some(account_type) = types.get(&account_id) else {
            continue;
        };
        let delta = account_type.normal_balance(debit, credit);
        if delta.is_zero() {
            continue;
        }
        sqlx::query(
            "UPDATE accounts SET current_balance = current_balance + $2, updated_utc = NOW() WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(delta)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn load_lines(
    conn: &mut PgConnection,
    entry_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<JournalLine>>, LedgerError> {
    let lines = sqlx::query_as::<_, JournalLine>(
        r#"
        SELECT line_id, entry_id, line_no, account_id, contact_id, debit, credit, memo
        FROM journal_lines
        WHERE entry_id = ANY($1)
        ORDER BY entry_id, line_no
        "#,
    )
    .bind(entry_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
    for line in lines {
        grouped.entry(line.entry_id).or_default().push(line);
    }
    Ok(grouped)
}

pub(crate) async fn fetch_entry(
    conn: &mut PgConnection,
    entry_id: Uuid,
    for_update: bool,
) -> Result<JournalEntry, LedgerError> {
    let sql = format!(
        "SELECT {} FROM journal_entries WHERE entry_id = $1{}",
        ENTRY_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let mut entry = sqlx::query_as::<_, JournalEntry>(&sql)
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Journal entry", entry_id))?;

    entry.lines = load_lines(conn, &[entry_id])
        .await?
        .remove(&entry_id)
        .unwrap_or_default();
    Ok(entry)
}

/// Validate and write an entry inside the caller's transaction.
///
/// Posted entries lock their accounts and move the cached balances.
/// Reversals may touch inactive accounts; every other entry may not.
pub(crate) async fn insert_entry(
    conn: &mut PgConnection,
    entry: &NewJournalEntry,
) -> Result<JournalEntry, LedgerError> {
    let description = entry.description.trim();
    if description.is_empty() {
        return Err(LedgerError::validation("Entry description is required"));
    }
    let (lines, totals) = validate_lines(&entry.lines)?;

    let posting = entry.status == EntryStatus::Posted;
    let types = lock_accounts(
        conn,
        &lines,
        entry.source_type != SourceType::Reversal,
    )
    .await?;
    check_contacts(conn, &lines).await?;

    let entry_id = Uuid::new_v4();
    let mut created = sqlx::query_as::<_, JournalEntry>(&format!(
        r#"
        INSERT INTO journal_entries
            (entry_id, entry_date, description, status, source_type, source_id, reverses_entry_id, posted_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $8 THEN NOW() ELSE NULL END)
        RETURNING {}
        "#,
        ENTRY_COLUMNS
    ))
    .bind(entry_id)
    .bind(entry.entry_date)
    .bind(description)
    .bind(entry.status.as_str())
    .bind(entry.source_type.as_str())
    .bind(entry.source_id)
    .bind(entry.reverses_entry_id)
    .bind(posting)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_unique_violation(e, || "Entry has already been reversed".to_string()))?;

    for (i, line) in lines.iter().enumerate() {
        let stored = sqlx::query_as::<_, JournalLine>(
            r#"
            INSERT INTO journal_lines (line_id, entry_id, line_no, account_id, contact_id, debit, credit, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING line_id, entry_id, line_no, account_id, contact_id, debit, credit, memo
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry_id)
        .bind(i as i32 + 1)
        .bind(line.account_id)
        .bind(line.contact_id)
        .bind(line.debit)
        .bind(line.credit)
        .bind(&line.memo)
        .fetch_one(&mut *conn)
        .await?;
        created.lines.push(stored);
    }

    if posting {
        apply_balances(conn, &types, &lines).await?;
    }

    JOURNAL_ENTRIES_TOTAL
        .with_label_values(&[entry.source_type.as_str(), entry.status.as_str()])
        .inc();

    info!(
        entry_id = %entry_id,
        entry_number = created.entry_number,
        source_type = entry.source_type.as_str(),
        status = entry.status.as_str(),
        total = %totals.total_debit,
        "Journal entry written"
    );

    Ok(created)
}

/// Post the mirror of a posted entry, dated `entry_date`.
pub(crate) async fn reverse_entry_tx(
    conn: &mut PgConnection,
    entry_id: Uuid,
    entry_date: Option<NaiveDate>,
) -> Result<JournalEntry, LedgerError> {
    let original = fetch_entry(conn, entry_id, true).await?;

    if original.status != EntryStatus::Posted {
        return Err(LedgerError::validation(format!(
            "Entry #{} is a draft; discard it instead of reversing",
            original.entry_number
        )));
    }
    if original.source_type == SourceType::Reversal {
        return Err(LedgerError::validation(format!(
            "Entry #{} is itself a reversal",
            original.entry_number
        )));
    }

    let already: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM journal_entries WHERE reverses_entry_id = $1)",
    )
    .bind(entry_id)
    .fetch_one(&mut *conn)
    .await?;
    if already {
        return Err(LedgerError::Duplicate(format!(
            "Entry #{} has already been reversed",
            original.entry_number
        )));
    }

    let reversal = NewJournalEntry::reversal_of(
        &original,
        entry_date.unwrap_or(original.entry_date),
    );
    insert_entry(conn, &reversal).await
}

/// Reverse `entry_id` unless a reversal already exists. Used by compensating
/// deletions, which date the reversal like the original.
pub(crate) async fn compensate_entry(
    conn: &mut PgConnection,
    entry_id: Option<Uuid>,
) -> Result<Option<Uuid>, LedgerError> {
    let Some(entry_id) = entry_id else {
        return Ok(None);
    };
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT entry_id FROM journal_entries WHERE reverses_entry_id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *conn)
            .await?;
    if existing.is_some() {
        return Ok(existing);
    }
    let reversal = reverse_entry_tx(conn, entry_id, None).await?;
    Ok(Some(reversal.entry_id))
}

impl Database {
    /// Validate and persist a journal entry with its lines in one transaction.
    #[instrument(skip(self, entry), fields(source_type = entry.source_type.as_str(), lines = entry.lines.len()))]
    pub async fn post_entry(&self, entry: &NewJournalEntry) -> Result<JournalEntry, LedgerError> {
        // Rejected input never opens a transaction.
        validate_lines(&entry.lines)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["post_entry"])
            .start_timer();

        let mut tx = self.begin().await?;
        let created = insert_entry(&mut tx, entry).await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(created)
    }

    /// Post a draft entry, applying it to account balances.
    #[instrument(skip(self))]
    pub async fn post_draft(&self, entry_id: Uuid) -> Result<JournalEntry, LedgerError> {
        let mut tx = self.begin().await?;
        let entry = fetch_entry(&mut tx, entry_id, true).await?;
        if entry.status == EntryStatus::Posted {
            return Err(LedgerError::validation(format!(
                "Entry #{} is already posted",
                entry.entry_number
            )));
        }

        let lines: Vec<JournalLineInput> = entry
            .lines
            .iter()
            .map(|l| JournalLineInput {
                account_id: l.account_id,
                debit: l.debit,
                credit: l.credit,
                contact_id: l.contact_id,
                memo: l.memo.clone(),
            })
            .collect();
        validate_lines(&lines)?;
        let types = lock_accounts(&mut tx, &lines, true).await?;
        apply_balances(&mut tx, &types, &lines).await?;

        sqlx::query(
            "UPDATE journal_entries SET status = 'posted', posted_utc = NOW() WHERE entry_id = $1",
        )
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        let posted = fetch_entry(&mut tx, entry_id, false).await?;
        tx.commit().await?;

        JOURNAL_ENTRIES_TOTAL
            .with_label_values(&[posted.source_type.as_str(), "posted"])
            .inc();
        info!(entry_id = %entry_id, entry_number = posted.entry_number, "Draft posted");
        Ok(posted)
    }

    /// Post a reversing entry for a posted entry. Each entry can be reversed once.
    #[instrument(skip(self))]
    pub async fn reverse_entry(
        &self,
        entry_id: Uuid,
        entry_date: Option<NaiveDate>,
    ) -> Result<JournalEntry, LedgerError> {
        let mut tx = self.begin().await?;
        let date = entry_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
        let reversal = reverse_entry_tx(&mut tx, entry_id, Some(date)).await?;
        tx.commit().await?;
        Ok(reversal)
    }

    /// Discard a draft. Posted entries are immutable.
    #[instrument(skip(self))]
    pub async fn delete_draft(&self, entry_id: Uuid) -> Result<(), LedgerError> {
        let mut tx = self.begin().await?;
        let entry = fetch_entry(&mut tx, entry_id, true).await?;
        if entry.status != EntryStatus::Draft {
            return Err(LedgerError::validation(format!(
                "Entry #{} is posted; post a reversal instead",
                entry.entry_number
            )));
        }

        sqlx::query("DELETE FROM journal_entries WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(entry_id = %entry_id, "Draft discarded");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_entry(&self, entry_id: Uuid) -> Result<JournalEntry, LedgerError> {
        let mut conn = self.pool().acquire().await?;
        fetch_entry(&mut conn, entry_id, false).await
    }

    /// Entries in date order, optionally limited to those touching one account.
    #[instrument(skip(self))]
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<JournalEntry>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_entries"])
            .start_timer();

        let mut tx = self.begin_snapshot().await?;
        let mut entries = sqlx::query_as::<_, JournalEntry>(&format!(
            r#"
            SELECT {}
            FROM journal_entries e
            WHERE ($1::date IS NULL OR e.entry_date >= $1)
              AND ($2::date IS NULL OR e.entry_date <= $2)
              AND ($3::uuid IS NULL OR EXISTS (
                    SELECT 1 FROM journal_lines l
                    WHERE l.entry_id = e.entry_id AND l.account_id = $3))
            ORDER BY e.entry_date, e.entry_number
            "#,
            ENTRY_COLUMNS
        ))
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.account_id)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = entries.iter().map(|e| e.entry_id).collect();
        let mut lines = load_lines(&mut tx, &ids).await?;
        for entry in &mut entries {
            entry.lines = lines.remove(&entry.entry_id).unwrap_or_default();
        }
        tx.commit().await?;

        timer.observe_duration();
        Ok(entries)
    }
}
