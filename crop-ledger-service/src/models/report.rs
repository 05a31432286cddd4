//! Trial balance and financial statements built from posted journal totals.

use super::account::AccountType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Posted debit and credit totals of one account over a date range.
#[derive(Debug, Clone, FromRow)]
pub struct AccountTotals {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub account_type: AccountType,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl AccountTotals {
    pub fn normal_balance(&self) -> Decimal {
        self.account_type
            .normal_balance(self.total_debit, self.total_credit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialBalanceLine {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of_date: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub is_balanced: bool,
}

impl TrialBalance {
    /// Net each account into a single column; accounts netting to zero are omitted.
    pub fn build(as_of_date: NaiveDate, totals: Vec<AccountTotals>) -> Self {
        let mut lines = Vec::with_capacity(totals.len());
        let mut total_debit = Decimal::ZERO;
        let mut total_credit = Decimal::ZERO;

        for t in totals {
            let net = t.total_debit - t.total_credit;
            if net.is_zero() {
                continue;
            }
            let (debit, credit) = if net > Decimal::ZERO {
                (net, Decimal::ZERO)
            } else {
                (Decimal::ZERO, -net)
            };
            total_debit += debit;
            total_credit += credit;
            lines.push(TrialBalanceLine {
                account_id: t.account_id,
                code: t.code,
                name: t.name,
                account_type: t.account_type,
                debit,
                credit,
            });
        }

        Self {
            as_of_date,
            lines,
            is_balanced: total_debit == total_credit,
            total_debit,
            total_credit,
        }
    }
}

/// Statement line carrying a normal-side amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportLine {
    /// Absent for computed lines such as current earnings.
    pub account_id: Option<Uuid>,
    pub code: Option<String>,
    pub name: String,
    pub account_type: AccountType,
    pub amount: Decimal,
}

impl From<&AccountTotals> for ReportLine {
    fn from(t: &AccountTotals) -> Self {
        Self {
            account_id: Some(t.account_id),
            code: Some(t.code.clone()),
            name: t.name.clone(),
            account_type: t.account_type,
            amount: t.normal_balance(),
        }
    }
}

fn lines_of(totals: &[AccountTotals], account_type: AccountType) -> (Vec<ReportLine>, Decimal) {
    let lines: Vec<ReportLine> = totals
        .iter()
        .filter(|t| t.account_type == account_type)
        .map(ReportLine::from)
        .filter(|line| !line.amount.is_zero())
        .collect();
    let total = lines.iter().map(|l| l.amount).sum();
    (lines, total)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub revenue: Vec<ReportLine>,
    pub expenses: Vec<ReportLine>,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
}

impl IncomeStatement {
    pub fn build(start_date: NaiveDate, end_date: NaiveDate, totals: &[AccountTotals]) -> Self {
        let (revenue, total_revenue) = lines_of(totals, AccountType::Revenue);
        let (expenses, total_expenses) = lines_of(totals, AccountType::Expense);

        Self {
            start_date,
            end_date,
            revenue,
            expenses,
            total_revenue,
            total_expenses,
            net_income: total_revenue - total_expenses,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of_date: NaiveDate,
    pub assets: Vec<ReportLine>,
    pub liabilities: Vec<ReportLine>,
    pub equity: Vec<ReportLine>,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub total_equity: Decimal,
    pub current_earnings: Decimal,
    pub is_balanced: bool,
}

impl BalanceSheet {
    /// Revenue and expense totals are closed into a current earnings equity line.
    pub fn build(as_of_date: NaiveDate, totals: &[AccountTotals]) -> Self {
        let (assets, total_assets) = lines_of(totals, AccountType::Asset);
        let (liabilities, total_liabilities) = lines_of(totals, AccountType::Liability);
        let (mut equity, equity_accounts) = lines_of(totals, AccountType::Equity);
        let (_, revenue) = lines_of(totals, AccountType::Revenue);
        let (_, expenses) = lines_of(totals, AccountType::Expense);

        let current_earnings = revenue - expenses;
        if !current_earnings.is_zero() {
            equity.push(ReportLine {
                account_id: None,
                code: None,
                name: "Current earnings".to_string(),
                account_type: AccountType::Equity,
                amount: current_earnings,
            });
        }
        let total_equity = equity_accounts + current_earnings;

        Self {
            as_of_date,
            assets,
            liabilities,
            equity,
            is_balanced: total_assets == total_liabilities + total_equity,
            total_assets,
            total_liabilities,
            total_equity,
            current_earnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn totals(code: &str, account_type: AccountType, debit: Decimal, credit: Decimal) -> AccountTotals {
        AccountTotals {
            account_id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            account_type,
            total_debit: debit,
            total_credit: credit,
        }
    }

    /// Ledger after: owner puts in 1000 cash, buys stock for 400 (100 paid),
    /// sells half of it for 350 cash, pays 20 expenses.
    fn ledger() -> Vec<AccountTotals> {
        vec![
            totals("1100", AccountType::Asset, dec!(1350), dec!(120)),
            totals("1300", AccountType::Asset, dec!(400), dec!(200)),
            totals("2100", AccountType::Liability, Decimal::ZERO, dec!(300)),
            totals("3100", AccountType::Equity, Decimal::ZERO, dec!(1000)),
            totals("4100", AccountType::Revenue, Decimal::ZERO, dec!(350)),
            totals("5100", AccountType::Expense, dec!(200), Decimal::ZERO),
            totals("5400", AccountType::Expense, dec!(20), Decimal::ZERO),
            totals("1200", AccountType::Asset, Decimal::ZERO, Decimal::ZERO),
        ]
    }

    #[test]
    fn trial_balance_columns_agree() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let tb = TrialBalance::build(date, ledger());

        assert!(tb.is_balanced);
        assert_eq!(tb.total_debit, tb.total_credit);
        assert_eq!(tb.total_debit, dec!(1650));
        // Zero-net account omitted.
        assert_eq!(tb.lines.len(), 7);
        for line in &tb.lines {
            assert!(line.debit.is_zero() != line.credit.is_zero());
        }
    }

    #[test]
    fn credit_balances_show_as_magnitude() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let tb = TrialBalance::build(date, ledger());
        let payable = tb.lines.iter().find(|l| l.code == "2100").unwrap();
        assert_eq!(payable.credit, dec!(300));
        assert_eq!(payable.debit, Decimal::ZERO);
    }

    #[test]
    fn income_statement_nets_revenue_and_expenses() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let statement = IncomeStatement::build(start, end, &ledger());

        assert_eq!(statement.total_revenue, dec!(350));
        assert_eq!(statement.total_expenses, dec!(220));
        assert_eq!(statement.net_income, dec!(130));
        assert_eq!(statement.expenses.len(), 2);
    }

    #[test]
    fn balance_sheet_balances_with_current_earnings() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let sheet = BalanceSheet::build(date, &ledger());

        assert_eq!(sheet.total_assets, dec!(1430));
        assert_eq!(sheet.total_liabilities, dec!(300));
        assert_eq!(sheet.current_earnings, dec!(130));
        assert_eq!(sheet.total_equity, dec!(1130));
        assert!(sheet.is_balanced);
        assert!(sheet
            .equity
            .iter()
            .any(|l| l.account_id.is_none() && l.amount == dec!(130)));
    }
}
