//! # Grouping Policy
//!
//! Date-bucketing strategies applied to archive destinations.
//!
//! ## Policies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  code      format key     example (2024-03-01)                          │
//! │  ───────   ────────────   ───────────────────                          │
//! │  daily     yyyy-MM-dd     2024-03-01                                   │
//! │  weekly    yyyy-MM-W      2024-03-1   (W = week of month)              │
//! │  monthly   yyyy-MM        2024-03     (default)                        │
//! │  none      -              no date segment                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Archive bucketing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// One folder per day.
    Daily,
    /// One folder per week of the month.
    Weekly,
    /// One folder per month.
    #[default]
    Monthly,
    /// No date segment at all.
    None,
}

impl GroupingPolicy {
    /// All policies, in declaration order.
    pub const ALL: [GroupingPolicy; 4] = [
        GroupingPolicy::Daily,
        GroupingPolicy::Weekly,
        GroupingPolicy::Monthly,
        GroupingPolicy::None,
    ];

    /// Resolves a configuration code.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. An
    /// unknown or blank code falls back to [`GroupingPolicy::Monthly`].
    pub fn from_code(code: &str) -> Self {
        Self::parse_code(code).unwrap_or_default()
    }

    /// Strict variant of [`GroupingPolicy::from_code`]; `None` when unknown.
    pub fn parse_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "daily" => Some(GroupingPolicy::Daily),
            "weekly" => Some(GroupingPolicy::Weekly),
            "monthly" => Some(GroupingPolicy::Monthly),
            "none" => Some(GroupingPolicy::None),
            _ => None,
        }
    }

    /// Configuration code of this policy.
    pub fn code(&self) -> &'static str {
        match self {
            GroupingPolicy::Daily => "daily",
            GroupingPolicy::Weekly => "weekly",
            GroupingPolicy::Monthly => "monthly",
            GroupingPolicy::None => "none",
        }
    }

    /// Date-format key of this policy, `None` when no date segment is used.
    pub fn format_key(&self) -> Option<&'static str> {
        match self {
            GroupingPolicy::Daily => Some("yyyy-MM-dd"),
            GroupingPolicy::Weekly => Some("yyyy-MM-W"),
            GroupingPolicy::Monthly => Some("yyyy-MM"),
            GroupingPolicy::None => None,
        }
    }

    /// Returns true if this policy adds a date segment.
    pub fn is_grouped(&self) -> bool {
        !matches!(self, GroupingPolicy::None)
    }

    /// Renders the date segment for `date`.
    pub fn format_date(&self, date: NaiveDate) -> Option<String> {
        match self {
            GroupingPolicy::Daily => Some(date.format("%Y-%m-%d").to_string()),
            GroupingPolicy::Weekly => Some(format!(
                "{}-{}",
                date.format("%Y-%m"),
                week_of_month(date)
            )),
            GroupingPolicy::Monthly => Some(date.format("%Y-%m").to_string()),
            GroupingPolicy::None => None,
        }
    }
}

impl std::fmt::Display for GroupingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Week of the month with Sunday-started weeks; the week holding the 1st is week 1.
fn week_of_month(date: NaiveDate) -> u32 {
    let offset = date
        .with_day(1)
        .map(|first| first.weekday().num_days_from_sunday())
        .unwrap_or(0);
    (date.day() + offset - 1) / 7 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_known_values() {
        assert_eq!(GroupingPolicy::from_code("daily"), GroupingPolicy::Daily);
        assert_eq!(GroupingPolicy::from_code(" WEEKLY "), GroupingPolicy::Weekly);
        assert_eq!(GroupingPolicy::from_code("monthly"), GroupingPolicy::Monthly);
        assert_eq!(GroupingPolicy::from_code("none"), GroupingPolicy::None);
    }

    #[test]
    fn test_unknown_code_defaults_to_monthly() {
        assert_eq!(GroupingPolicy::from_code("hourly"), GroupingPolicy::Monthly);
        assert_eq!(GroupingPolicy::from_code(""), GroupingPolicy::Monthly);
        assert_eq!(GroupingPolicy::parse_code("hourly"), None);
    }

    #[test]
    fn test_code_round_trip_for_named_policies() {
        for policy in [
            GroupingPolicy::Daily,
            GroupingPolicy::Weekly,
            GroupingPolicy::Monthly,
        ] {
            assert_eq!(GroupingPolicy::from_code(policy.code()), policy);
        }
    }

    #[test]
    fn test_format_keys() {
        assert_eq!(GroupingPolicy::Daily.format_key(), Some("yyyy-MM-dd"));
        assert_eq!(GroupingPolicy::Weekly.format_key(), Some("yyyy-MM-W"));
        assert_eq!(GroupingPolicy::Monthly.format_key(), Some("yyyy-MM"));
        assert_eq!(GroupingPolicy::None.format_key(), None);
    }

    #[test]
    fn test_format_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            GroupingPolicy::Daily.format_date(date).as_deref(),
            Some("2024-03-01")
        );
        assert_eq!(
            GroupingPolicy::Monthly.format_date(date).as_deref(),
            Some("2024-03")
        );
        assert_eq!(
            GroupingPolicy::Weekly.format_date(date).as_deref(),
            Some("2024-03-1")
        );
        assert_eq!(GroupingPolicy::None.format_date(date), None);
    }

    #[test]
    fn test_week_of_month() {
        // March 2024 starts on a Friday: 1-2 are week 1, 3-9 week 2.
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        assert_eq!(week_of_month(d(2)), 1);
        assert_eq!(week_of_month(d(3)), 2);
        assert_eq!(week_of_month(d(9)), 2);
        assert_eq!(week_of_month(d(31)), 6);

        // September 2024 starts on a Sunday.
        let s = NaiveDate::from_ymd_opt(2024, 9, 7).unwrap();
        assert_eq!(week_of_month(s), 1);
    }
}
