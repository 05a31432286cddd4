//! Chart of accounts operations.

use super::error::map_unique_violation;
use super::metrics::DB_QUERY_DURATION;
use super::{Database, LedgerError};
use crate::models::{Account, AccountBalance, AccountType, CreateAccount, UpdateAccount};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "account_id, code, name, account_type, current_balance, is_active, is_system, created_utc, updated_utc";

/// Posted debit and credit totals of one account.
pub(crate) async fn posted_totals(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<(Decimal, Decimal), LedgerError> {
    let totals: (Decimal, Decimal) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(l.debit), 0), COALESCE(SUM(l.credit), 0)
        FROM journal_lines l
        JOIN journal_entries e ON e.entry_id = l.entry_id
        WHERE l.account_id = $1 AND e.status = 'posted'
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(totals)
}

async fn fetch_account(
    conn: &mut PgConnection,
    account_id: Uuid,
    for_update: bool,
) -> Result<Account, LedgerError> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE account_id = $1{}",
        ACCOUNT_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Account>(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Account", account_id))
}

impl Database {
    /// Create a new account.
    #[instrument(skip(self, input), fields(code = %input.code, account_type = %input.account_type))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, LedgerError> {
        let code = input.code.trim();
        let name = input.name.trim();
        if code.is_empty() || name.is_empty() {
            return Err(LedgerError::validation("Account code and name are required"));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (account_id, code, name, account_type)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(input.account_type.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            map_unique_violation(e, || format!("Account with code '{}' already exists", code))
        })?;

        timer.observe_duration();

        info!(
            account_id = %account.account_id,
            account_type = %account.account_type,
            "Account created"
        );

        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn get_account(&self, account_id: Uuid) -> Result<Account, LedgerError> {
        let mut conn = self.pool().acquire().await?;
        fetch_account(&mut conn, account_id, false).await
    }

    /// List accounts ordered by code.
    #[instrument(skip(self))]
    pub async fn list_accounts(
        &self,
        account_type: Option<AccountType>,
        include_inactive: bool,
    ) -> Result<Vec<Account>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {}
            FROM accounts
            WHERE ($1::text IS NULL OR account_type = $1)
              AND ($2 OR is_active)
            ORDER BY code
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_type.map(|t| t.as_str()))
        .bind(include_inactive)
        .fetch_all(self.pool())
        .await?;

        timer.observe_duration();
        Ok(accounts)
    }

    /// Rename or re-code an account. System account codes are fixed.
    #[instrument(skip(self, input))]
    pub async fn update_account(
        &self,
        account_id: Uuid,
        input: &UpdateAccount,
    ) -> Result<Account, LedgerError> {
        let mut tx = self.begin().await?;
        let current = fetch_account(&mut tx, account_id, true).await?;

        let code = match input.code.as_deref().map(str::trim) {
            Some("") => return Err(LedgerError::validation("Account code must not be empty")),
            Some(code) if code != current.code && current.is_system => {
                return Err(LedgerError::validation(
                    "System account codes cannot be changed",
                ))
            }
            Some(code) => code.to_string(),
            None => current.code.clone(),
        };
        let name = match input.name.as_deref().map(str::trim) {
            Some("") => return Err(LedgerError::validation("Account name must not be empty")),
            Some(name) => name.to_string(),
            None => current.name.clone(),
        };

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts SET code = $2, name = $3, updated_utc = NOW()
            WHERE account_id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(&code)
        .bind(&name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, || format!("Account with code '{}' already exists", code))
        })?;

        tx.commit().await?;
        info!(account_id = %account_id, "Account updated");
        Ok(account)
    }

    /// Activate or deactivate an account. Inactive accounts reject new postings.
    #[instrument(skip(self))]
    pub async fn set_account_active(
        &self,
        account_id: Uuid,
        is_active: bool,
    ) -> Result<Account, LedgerError> {
        let mut tx = self.begin().await?;
        let current = fetch_account(&mut tx, account_id, true).await?;
        if current.is_system && !is_active {
            return Err(LedgerError::validation(
                "System posting accounts cannot be deactivated",
            ));
        }

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts SET is_active = $2, updated_utc = NOW()
            WHERE account_id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(is_active)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(account_id = %account_id, is_active = is_active, "Account status changed");
        Ok(account)
    }

    /// Cached balance, or with `recompute` the balance rebuilt from posted
    /// lines, repairing the cache when it disagrees.
    #[instrument(skip(self))]
    pub async fn get_balance(
        &self,
        account_id: Uuid,
        recompute: bool,
    ) -> Result<AccountBalance, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_balance"])
            .start_timer();

        let mut tx = self.begin().await?;
        let account = fetch_account(&mut tx, account_id, recompute).await?;
        let (total_debit, total_credit) = posted_totals(&mut tx, account_id).await?;

        let mut balance = account.current_balance;
        let mut repaired = false;
        if recompute {
            let derived = account.account_type.normal_balance(total_debit, total_credit);
            if derived != account.current_balance {
                warn!(
                    account_id = %account_id,
                    cached = %account.current_balance,
                    derived = %derived,
                    "Cached balance was stale, repairing"
                );
                sqlx::query(
                    "UPDATE accounts SET current_balance = $2, updated_utc = NOW() WHERE account_id = $1",
                )
                .bind(account_id)
                .bind(derived)
                .execute(&mut *tx)
                .await?;
                repaired = true;
            }
            balance = derived;
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(AccountBalance {
            account_id,
            account_type: account.account_type,
            balance,
            total_debit,
            total_credit,
            repaired,
        })
    }
}
