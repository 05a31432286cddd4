//! Trial balance, income statement and balance sheet over posted entries.

use super::metrics::DB_QUERY_DURATION;
use super::{Database, LedgerError};
use crate::models::{AccountTotals, BalanceSheet, IncomeStatement, TrialBalance};
use chrono::NaiveDate;
use sqlx::postgres::PgConnection;
use tracing::instrument;

/// Posted debit and credit totals per account within an optional date range.
/// Accounts without activity are returned with zero totals.
async fn account_totals(
    conn: &mut PgConnection,
    start_date: Option<NaiveDate>,
    end_date: NaiveDate,
) -> Result<Vec<AccountTotals>, LedgerError> {
    Ok(sqlx::query_as::<_, AccountTotals>(
        r#"
        SELECT a.account_id, a.code, a.name, a.account_type,
               COALESCE(SUM(p.debit), 0)  AS total_debit,
               COALESCE(SUM(p.credit), 0) AS total_credit
        FROM accounts a
        LEFT JOIN (
            SELECT l.account_id, l.debit, l.credit
            FROM journal_lines l
            JOIN journal_entries e ON e.entry_id = l.entry_id
            WHERE e.status = 'posted'
              AND ($1::date IS NULL OR e.entry_date >= $1)
              AND e.entry_date <= $2
        ) p ON p.account_id = a.account_id
        GROUP BY a.account_id, a.code, a.name, a.account_type
        ORDER BY a.code
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(&mut *conn)
    .await?)
}

impl Database {
    #[instrument(skip(self))]
    pub async fn trial_balance(&self, as_of_date: NaiveDate) -> Result<TrialBalance, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["trial_balance"])
            .start_timer();

        let mut tx = self.begin_snapshot().await?;
        let totals = account_totals(&mut tx, None, as_of_date).await?;
        tx.commit().await?;
        timer.observe_duration();

        Ok(TrialBalance::build(as_of_date, totals))
    }

    #[instrument(skip(self))]
    pub async fn income_statement(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<IncomeStatement, LedgerError> {
        if start_date > end_date {
            return Err(LedgerError::validation(
                "start_date must not be after end_date",
            ));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["income_statement"])
            .start_timer();

        let mut tx = self.begin_snapshot().await?;
        let totals = account_totals(&mut tx, Some(start_date), end_date).await?;
        tx.commit().await?;
        timer.observe_duration();

        Ok(IncomeStatement::build(start_date, end_date, &totals))
    }

    #[instrument(skip(self))]
    pub async fn balance_sheet(&self, as_of_date: NaiveDate) -> Result<BalanceSheet, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["balance_sheet"])
            .start_timer();

        let mut tx = self.begin_snapshot().await?;
        let totals = account_totals(&mut tx, None, as_of_date).await?;
        tx.commit().await?;
        timer.observe_duration();

        Ok(BalanceSheet::build(as_of_date, &totals))
    }
}
