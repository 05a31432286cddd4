//! Journal entry model for double-entry accounting.

use super::UnknownVariant;
use crate::services::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Round a monetary amount to cents.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Lifecycle of a journal entry. Only posted entries affect balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Draft,
    #[default]
    Posted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
        }
    }
}

impl TryFrom<String> for EntryStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(Self::Draft),
            "posted" => Ok(Self::Posted),
            _ => Err(UnknownVariant::new("status", value)),
        }
    }
}

/// What produced a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Manual,
    Purchase,
    Sale,
    Expense,
    Adjustment,
    Transformation,
    Reversal,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::Expense => "expense",
            Self::Adjustment => "adjustment",
            Self::Transformation => "transformation",
            Self::Reversal => "reversal",
        }
    }
}

impl TryFrom<String> for SourceType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "manual" => Ok(Self::Manual),
            "purchase" => Ok(Self::Purchase),
            "sale" => Ok(Self::Sale),
            "expense" => Ok(Self::Expense),
            "adjustment" => Ok(Self::Adjustment),
            "transformation" => Ok(Self::Transformation),
            "reversal" => Ok(Self::Reversal),
            _ => Err(UnknownVariant::new("source_type", value)),
        }
    }
}

/// Journal entry header with its lines.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub entry_number: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    #[sqlx(try_from = "String")]
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub reverses_entry_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub posted_utc: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    pub fn totals(&self) -> EntryTotals {
        EntryTotals {
            total_debit: self.lines.iter().map(|l| l.debit).sum(),
            total_credit: self.lines.iter().map(|l| l.credit).sum(),
        }
    }
}

/// Single persisted journal line.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_id: Uuid,
    pub entry_id: Uuid,
    pub line_no: i32,
    pub account_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub memo: Option<String>,
}

/// Input for one line of a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl JournalLineInput {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            contact_id: None,
            memo: None,
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            contact_id: None,
            memo: None,
        }
    }

    pub fn with_contact(mut self, contact_id: Option<Uuid>) -> Self {
        self.contact_id = contact_id;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// A journal entry about to be written.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub entry_date: NaiveDate,
    pub description: String,
    pub status: EntryStatus,
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub reverses_entry_id: Option<Uuid>,
    pub lines: Vec<JournalLineInput>,
}

impl NewJournalEntry {
    /// A posted entry generated by a domain event.
    pub fn posted(
        entry_date: NaiveDate,
        description: impl Into<String>,
        source_type: SourceType,
        source_id: Uuid,
        lines: Vec<JournalLineInput>,
    ) -> Self {
        Self {
            entry_date,
            description: description.into(),
            status: EntryStatus::Posted,
            source_type,
            source_id: Some(source_id),
            reverses_entry_id: None,
            lines,
        }
    }

    /// Mirror entry that cancels `original` (debits and credits swapped).
    pub fn reversal_of(original: &JournalEntry, entry_date: NaiveDate) -> Self {
        let lines = original
            .lines
            .iter()
            .map(|line| JournalLineInput {
                account_id: line.account_id,
                debit: line.credit,
                credit: line.debit,
                contact_id: line.contact_id,
                memo: line.memo.clone(),
            })
            .collect();

        Self {
            entry_date,
            description: format!(
                "Reversal of entry #{}: {}",
                original.entry_number, original.description
            ),
            status: EntryStatus::Posted,
            source_type: SourceType::Reversal,
            source_id: original.source_id,
            reverses_entry_id: Some(original.entry_id),
            lines,
        }
    }
}

/// Debit and credit totals of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTotals {
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

/// Validate and normalize the lines of a new entry.
///
/// Amounts are rounded to cents; each line must carry exactly one positive
/// side; debits must equal credits after rounding and the total must be
/// non-zero. Returns the rounded lines and their totals.
pub fn validate_lines(
    lines: &[JournalLineInput],
) -> Result<(Vec<JournalLineInput>, EntryTotals), LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::validation(
            "A journal entry needs at least 2 lines",
        ));
    }

    let mut normalized = Vec::with_capacity(lines.len());
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;

    for (i, line) in lines.iter().enumerate() {
        let debit = round_money(line.debit);
        let credit = round_money(line.credit);

        if debit.is_sign_negative() && !debit.is_zero()
            || credit.is_sign_negative() && !credit.is_zero()
        {
            return Err(LedgerError::validation(format!(
                "Line {} has a negative amount",
                i + 1
            )));
        }

        let has_debit = debit > Decimal::ZERO;
        let has_credit = credit > Decimal::ZERO;
        if has_debit == has_credit {
            return Err(LedgerError::validation(format!(
                "Line {} must have exactly one of debit or credit",
                i + 1
            )));
        }

        total_debit += debit;
        total_credit += credit;
        normalized.push(JournalLineInput {
            debit,
            credit,
            ..line.clone()
        });
    }

    if total_debit != total_credit {
        return Err(LedgerError::UnbalancedEntry {
            total_debit,
            total_credit,
        });
    }

    if total_debit.is_zero() {
        return Err(LedgerError::validation("Entry total must be greater than zero"));
    }

    Ok((
        normalized,
        EntryTotals {
            total_debit,
            total_credit,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn accounts() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn balanced_entry_is_accepted() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(100)),
            JournalLineInput::credit(b, dec!(100)),
        ];

        let (normalized, totals) = validate_lines(&lines).unwrap();
        assert_eq!(normalized.len(), 2);
        assert_eq!(totals.total_debit, dec!(100));
        assert_eq!(totals.total_credit, dec!(100));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(100)),
            JournalLineInput::credit(b, dec!(50)),
        ];

        let err = validate_lines(&lines).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::UnbalancedEntry { total_debit, total_credit }
                if total_debit == dec!(100) && total_credit == dec!(50)
        ));
        assert_eq!(err.to_string(), "Entry lines are not balanced");
    }

    #[test]
    fn sub_cent_differences_are_absorbed_by_rounding() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(100.004)),
            JournalLineInput::credit(b, dec!(100.00)),
        ];

        let (normalized, totals) = validate_lines(&lines).unwrap();
        assert_eq!(normalized[0].debit, dec!(100.00));
        assert_eq!(totals.total_debit, totals.total_credit);
    }

    #[test]
    fn cent_differences_are_not_tolerated() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(100.01)),
            JournalLineInput::credit(b, dec!(100.00)),
        ];

        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::UnbalancedEntry { .. })
        ));
    }

    #[test]
    fn lines_are_rounded_one_by_one() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(33.333)),
            JournalLineInput::debit(a, dec!(33.333)),
            JournalLineInput::debit(a, dec!(33.333)),
            JournalLineInput::credit(b, dec!(99.999)),
        ];

        // Unrounded the sides agree; per line they come to 99.99 and 100.00.
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::UnbalancedEntry { total_debit, total_credit })
                if total_debit == dec!(99.99) && total_credit == dec!(100.00)
        ));
    }

    #[test]
    fn single_line_is_rejected() {
        let (a, _) = accounts();
        let lines = vec![JournalLineInput::debit(a, dec!(10))];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn line_with_both_sides_is_rejected() {
        let (a, b) = accounts();
        let mut both = JournalLineInput::debit(a, dec!(10));
        both.credit = dec!(10);
        let lines = vec![both, JournalLineInput::credit(b, dec!(10))];

        let err = validate_lines(&lines).unwrap_err();
        assert!(err.to_string().contains("exactly one of debit or credit"));
    }

    #[test]
    fn zero_line_is_rejected() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, Decimal::ZERO),
            JournalLineInput::credit(b, Decimal::ZERO),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let (a, b) = accounts();
        let lines = vec![
            JournalLineInput::debit(a, dec!(-10)),
            JournalLineInput::credit(b, dec!(-10)),
        ];
        let err = validate_lines(&lines).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn reversal_swaps_sides() {
        let (a, b) = accounts();
        let entry_id = Uuid::new_v4();
        let original = JournalEntry {
            entry_id,
            entry_number: 7,
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            description: "Spoilage".to_string(),
            status: EntryStatus::Posted,
            source_type: SourceType::Adjustment,
            source_id: Some(Uuid::new_v4()),
            reverses_entry_id: None,
            created_utc: Utc::now(),
            posted_utc: Some(Utc::now()),
            lines: vec![
                JournalLine {
                    line_id: Uuid::new_v4(),
                    entry_id,
                    line_no: 1,
                    account_id: a,
                    contact_id: None,
                    debit: dec!(20),
                    credit: Decimal::ZERO,
                    memo: None,
                },
                JournalLine {
                    line_id: Uuid::new_v4(),
                    entry_id,
                    line_no: 2,
                    account_id: b,
                    contact_id: None,
                    debit: Decimal::ZERO,
                    credit: dec!(20),
                    memo: None,
                },
            ],
        };

        let reversal =
            NewJournalEntry::reversal_of(&original, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(reversal.reverses_entry_id, Some(entry_id));
        assert_eq!(reversal.source_type, SourceType::Reversal);
        assert_eq!(reversal.lines[0].credit, dec!(20));
        assert_eq!(reversal.lines[1].debit, dec!(20));
        assert!(validate_lines(&reversal.lines).is_ok());
    }
}
