use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Category, CategoryId, Cents, LedgerTransaction, TransactionKind};

/// How far back a summary reaches when no start date is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Week,
    Month,
    Year,
}

impl SummaryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryPeriod::Week => "week",
            SummaryPeriod::Month => "month",
            SummaryPeriod::Year => "year",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "week" | "weekly" => Some(SummaryPeriod::Week),
            "month" | "monthly" => Some(SummaryPeriod::Month),
            "year" | "yearly" => Some(SummaryPeriod::Year),
            _ => None,
        }
    }

    /// Start of the period that ends at `end`.
    pub fn start_before(&self, end: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            SummaryPeriod::Week => end - Duration::days(7),
            SummaryPeriod::Month => end
                .checked_sub_months(Months::new(1))
                .unwrap_or(end - Duration::days(31)),
            SummaryPeriod::Year => end
                .checked_sub_months(Months::new(12))
                .unwrap_or(end - Duration::days(365)),
        }
    }
}

/// Inclusive date range a summary covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SummaryRange {
    pub fn last(period: SummaryPeriod, end: DateTime<Utc>) -> Self {
        Self {
            from: period.start_before(end),
            to: end,
        }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// Size of the buckets a cash-flow summary is split into. Chosen from the
/// length of the range: days up to a week, ISO weeks up to a month, months
/// beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn for_range(range: &SummaryRange) -> Self {
        match (range.to - range.from).num_days() {
            d if d <= 7 => Granularity::Day,
            d if d <= 31 => Granularity::Week,
            _ => Granularity::Month,
        }
    }

    /// Sortable label of the bucket holding `date`.
    pub fn label(&self, date: DateTime<Utc>) -> String {
        match self {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Week => date.format("%G-W%V").to_string(),
            Granularity::Month => date.format("%Y-%m").to_string(),
        }
    }

    /// Every bucket label in the range, in order.
    fn labels(&self, range: &SummaryRange) -> Vec<String> {
        let last = range.to.date_naive();
        let mut labels: Vec<String> = Vec::new();
        for day in range.from.date_naive().iter_days().take_while(|d| *d <= last) {
            let label = self.label(day.and_time(chrono::NaiveTime::MIN).and_utc());
            if labels.last() != Some(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    /// `None` for spending without a category.
    pub category_id: Option<CategoryId>,
    pub category: String,
    pub total: Cents,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub categories: Vec<CategorySummary>,
    pub total: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowPeriod {
    pub label: String,
    pub income: Cents,
    pub expense: Cents,
    pub net: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowReport {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub granularity: Granularity,
    pub periods: Vec<CashFlowPeriod>,
}

/// Expense totals per category, largest first.
pub fn build_category_report(
    range: &SummaryRange,
    entries: &[LedgerTransaction],
    categories: &[Category],
) -> CategoryReport {
    let names: HashMap<CategoryId, &str> =
        categories.iter().map(|c| (c.id, c.name.as_str())).collect();

    let mut sums: HashMap<Option<CategoryId>, (Cents, i64)> = HashMap::new();
    let mut total = 0;
    for entry in entries.iter().filter(|e| e.kind == TransactionKind::Expense) {
        let slot = sums.entry(entry.category_id).or_insert((0, 0));
        slot.0 += entry.amount_cents;
        slot.1 += 1;
        total += entry.amount_cents;
    }

    let mut summaries: Vec<CategorySummary> = sums
        .into_iter()
        .map(|(category_id, (sum, count))| {
            let category = match category_id {
                None => "Others".to_string(),
                Some(id) => names.get(&id).copied().unwrap_or("Uncategorized").to_string(),
            };
            CategorySummary {
                category_id,
                category,
                total: sum,
                count,
                percentage: if total > 0 {
                    sum as f64 * 100.0 / total as f64
                } else {
                    0.0
                },
            }
        })
        .collect();
    summaries.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.category.cmp(&b.category)));

    CategoryReport {
        from_date: range.from,
        to_date: range.to,
        categories: summaries,
        total,
    }
}

/// Income and expense per bucket. Every bucket in the range is present,
/// including empty ones.
pub fn build_cash_flow_report(
    range: &SummaryRange,
    entries: &[LedgerTransaction],
) -> CashFlowReport {
    let granularity = Granularity::for_range(range);

    let mut periods: Vec<CashFlowPeriod> = granularity
        .labels(range)
        .into_iter()
        .map(|label| CashFlowPeriod {
            label,
            income: 0,
            expense: 0,
            net: 0,
        })
        .collect();

    for entry in entries {
        let label = granularity.label(entry.date);
        let Some(period) = periods.iter_mut().find(|p| p.label == label) else {
            continue;
        };
        match entry.kind {
            TransactionKind::Income => period.income += entry.amount_cents,
            TransactionKind::Expense => period.expense += entry.amount_cents,
            TransactionKind::InitialBalance => continue,
        }
        period.net = period.income - period.expense;
    }

    CashFlowReport {
        from_date: range.from,
        to_date: range.to,
        granularity,
        periods,
    }
}
