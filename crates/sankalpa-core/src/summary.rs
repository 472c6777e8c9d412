//! ============================================================================
//! Habit Summary - 7-day rollups, streaks and at-risk nudges
//! ============================================================================
//! Pure computation over a user's recent rows:
//! - rows are grouped by trimmed, lower-cased habit name
//! - count / average / unit come from the trailing 7 days
//! - streaks use every distinct day in the 30-day lookback
//! - a nudge fires when a streak of 2+ days ending yesterday has no log today
//! ============================================================================

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::db::HabitStore;
use crate::identity::UserKey;

/// Window for count / average / unit
pub const SUMMARY_DAYS: i64 = 7;

/// How far back rows are fetched for streak arithmetic
pub const STREAK_LOOKBACK_DAYS: i64 = 30;

/// Most nudges surfaced at once
pub const MAX_NUDGES: usize = 3;

/// Shortest streak worth a nudge
pub const MIN_NUDGE_STREAK: u32 = 2;

/// Canonical unit abbreviations for display
const UNIT_DISPLAY: &[(&str, &str)] = &[
    ("minutes", "min"),
    ("minute", "min"),
    ("hours", "hr"),
    ("hour", "hr"),
    ("glasses", "glasses"),
    ("glass", "glass"),
    ("cups", "cups"),
    ("cup", "cup"),
    ("reps", "reps"),
    ("rounds", "rounds"),
    ("sets", "sets"),
    ("ml", "ml"),
    ("liters", "L"),
    ("litres", "L"),
    ("km", "km"),
    ("miles", "mi"),
    ("steps", "steps"),
];

/// Columns of a stored log the engine reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub habit_name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub date: NaiveDate,
}

/// Per-habit rollup, recomputed on every read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitSummaryRow {
    /// Normalized grouping key
    pub habit_name: String,
    pub habit_name_display: String,
    /// Logs in the trailing window
    pub count: usize,
    /// Rounded mean of non-null quantities in the window
    pub avg_quantity: Option<i64>,
    pub unit: Option<String>,
    pub unit_display: Option<String>,
    pub current_streak: u32,
    pub logged_today: bool,
}

/// A streak about to break today
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NudgeEntry {
    pub habit_name: String,
    pub habit_name_display: String,
    pub streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitSummary {
    pub summary: Vec<HabitSummaryRow>,
    pub nudges: Vec<NudgeEntry>,
}

/// Unit frequencies with first-seen order kept separately for tie-breaks
#[derive(Debug, Default)]
struct UnitTally {
    counts: HashMap<String, usize>,
    first_seen: Vec<String>,
}

impl UnitTally {
    fn push(&mut self, unit: String) {
        let count = self.counts.entry(unit.clone()).or_insert(0);
        if *count == 0 {
            self.first_seen.push(unit);
        }
        *count += 1;
    }

    /// Highest count wins; equal counts go to the unit seen first
    fn most_frequent(&self) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for unit in &self.first_seen {
            let count = self.counts.get(unit).copied().unwrap_or(0);
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((unit.as_str(), count)),
            }
        }
        best.map(|(unit, _)| unit)
    }
}

#[derive(Debug)]
struct HabitGroup {
    habit_name: String,
    count: usize,
    quantities: Vec<f64>,
    units: UnitTally,
    dates: HashSet<NaiveDate>,
}

impl HabitGroup {
    fn new(habit_name: String) -> Self {
        Self {
            habit_name,
            count: 0,
            quantities: Vec::new(),
            units: UnitTally::default(),
            dates: HashSet::new(),
        }
    }
}

/// Build the summary for `rows` as seen on `today`
pub fn summarize(rows: &[LogRow], today: NaiveDate) -> HabitSummary {
    let summary_from = today - Duration::days(SUMMARY_DAYS);
    let lookback_from = today - Duration::days(STREAK_LOOKBACK_DAYS);

    // Descending date; rows of the same day keep their given order
    let mut ordered: Vec<&LogRow> = rows.iter().filter(|r| r.date >= lookback_from).collect();
    ordered.sort_by(|a, b| b.date.cmp(&a.date));

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, HabitGroup> = HashMap::new();

    for row in ordered {
        let name = row.habit_name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let group = groups.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            HabitGroup::new(name)
        });

        group.dates.insert(row.date);
        if row.date >= summary_from {
            group.count += 1;
            if let Some(q) = row.quantity.filter(|q| q.is_finite()) {
                group.quantities.push(q);
            }
            if let Some(unit) = row.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                group.units.push(unit.to_lowercase());
            }
        }
    }

    let yesterday = today - Duration::days(1);
    let mut summary = Vec::new();
    let mut at_risk = Vec::new();

    for name in &order {
        let Some(group) = groups.get(name) else { continue };

        let logged_today = group.dates.contains(&today);
        let current_streak = if logged_today {
            consecutive_days(&group.dates, today)
        } else {
            0
        };
        let streak_as_of_yesterday = consecutive_days(&group.dates, yesterday);
        let display = title_case(&group.habit_name);

        if streak_as_of_yesterday >= MIN_NUDGE_STREAK && !logged_today {
            at_risk.push(NudgeEntry {
                habit_name: group.habit_name.clone(),
                habit_name_display: display.clone(),
                streak: streak_as_of_yesterday,
            });
        }

        if group.count > 0 {
            let unit = group.units.most_frequent().map(str::to_string);
            summary.push(HabitSummaryRow {
                habit_name: group.habit_name.clone(),
                habit_name_display: display,
                count: group.count,
                avg_quantity: rounded_mean(&group.quantities),
                unit_display: unit.as_deref().map(unit_display),
                unit,
                current_streak,
                logged_today,
            });
        }
    }

    summary.sort_by(|a, b| a.habit_name.cmp(&b.habit_name));
    // Stable: equal streaks keep first-seen order
    at_risk.sort_by(|a, b| b.streak.cmp(&a.streak));
    at_risk.truncate(MAX_NUDGES);

    debug!(
        "Summarized {} rows into {} habits, {} nudges",
        rows.len(),
        summary.len(),
        at_risk.len()
    );

    HabitSummary {
        summary,
        nudges: at_risk,
    }
}

/// Fetch the user's lookback window from the store and summarize it for today.
/// Store errors are returned as-is; an empty store is an empty summary.
pub fn get_habit_summary(store: &dyn HabitStore, user_key: &UserKey) -> Result<HabitSummary> {
    get_habit_summary_at(store, user_key, Utc::now().date_naive())
}

pub fn get_habit_summary_at(
    store: &dyn HabitStore,
    user_key: &UserKey,
    today: NaiveDate,
) -> Result<HabitSummary> {
    let from = today - Duration::days(STREAK_LOOKBACK_DAYS);
    let rows: Vec<LogRow> = store
        .logs_since(user_key, from)?
        .iter()
        .map(|entry| entry.to_row())
        .collect();
    Ok(summarize(&rows, today))
}

/// Length of the run of consecutive logged days ending at `anchor`
pub fn consecutive_days(dates: &HashSet<NaiveDate>, anchor: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = anchor;
    while dates.contains(&day) {
        count += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    count
}

/// Mean rounded half-up, None when there is nothing to average
fn rounded_mean(values: &[f64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean + 0.5).floor() as i64)
}

/// "morning run" -> "Morning Run"
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_is_word = false;
    for c in name.trim().to_lowercase().chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && !prev_is_word {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        prev_is_word = is_word;
    }
    out
}

/// Canonical abbreviation, or the lower-cased unit when there is none
pub fn unit_display(unit: &str) -> String {
    let key = unit.trim().to_lowercase();
    UNIT_DISPLAY
        .iter()
        .find(|(raw, _)| *raw == key)
        .map(|(_, short)| short.to_string())
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CompletionOutcome, HabitLogEntry};
    use crate::types::HabitCandidate;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Store that only answers `logs_since`, with a fixed result
    struct ReadOnlyStore {
        answer: std::result::Result<Vec<HabitLogEntry>, String>,
        asked_from: Mutex<Option<NaiveDate>>,
    }

    impl ReadOnlyStore {
        fn failing(reason: &str) -> Self {
            Self {
                answer: Err(reason.to_string()),
                asked_from: Mutex::new(None),
            }
        }

        fn with_rows(rows: Vec<HabitLogEntry>) -> Self {
            Self {
                answer: Ok(rows),
                asked_from: Mutex::new(None),
            }
        }
    }

    impl HabitStore for ReadOnlyStore {
        fn save_candidates(
            &self,
            _user_key: &UserKey,
            _candidates: &[HabitCandidate],
            _voice_input: &str,
            _today: NaiveDate,
        ) -> Result<Vec<HabitLogEntry>> {
            Err(anyhow!("read only"))
        }

        fn complete_entry(
            &self,
            _id: &str,
            _user_key: &UserKey,
            _quantity: f64,
            _unit: Option<&str>,
        ) -> Result<CompletionOutcome> {
            Err(anyhow!("read only"))
        }

        fn logs_since(&self, _user_key: &UserKey, from: NaiveDate) -> Result<Vec<HabitLogEntry>> {
            *self.asked_from.lock().unwrap() = Some(from);
            self.answer.clone().map_err(|e| anyhow!(e))
        }
    }

    fn entry(name: &str, ago: i64) -> HabitLogEntry {
        HabitLogEntry {
            id: format!("{}-{}", name, ago),
            user_key: UserKey::derive("alice").as_str().to_string(),
            habit_name: name.to_string(),
            quantity: Some(10.0),
            unit: Some("minutes".to_string()),
            date: days_ago(ago),
            voice_input: name.to_string(),
            is_complete: true,
            is_deleted: false,
            created_at: 0,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn days_ago(n: i64) -> NaiveDate {
        today() - Duration::days(n)
    }

    fn row(name: &str, quantity: Option<f64>, unit: Option<&str>, ago: i64) -> LogRow {
        LogRow {
            habit_name: name.to_string(),
            quantity,
            unit: unit.map(str::to_string),
            date: days_ago(ago),
        }
    }

    #[test]
    fn test_empty_rows() {
        let result = summarize(&[], today());
        assert!(result.summary.is_empty());
        assert!(result.nudges.is_empty());
    }

    #[test]
    fn test_streak_through_today() {
        let rows = vec![
            row("yoga", None, None, 0),
            row("yoga", None, None, 1),
            row("yoga", None, None, 2),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].current_streak, 3);
        assert!(result.summary[0].logged_today);
        assert!(result.nudges.is_empty());
    }

    #[test]
    fn test_streak_at_risk() {
        let rows = vec![row("yoga", None, None, 1), row("yoga", None, None, 2)];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].current_streak, 0);
        assert!(!result.summary[0].logged_today);
        assert_eq!(
            result.nudges,
            vec![NudgeEntry {
                habit_name: "yoga".into(),
                habit_name_display: "Yoga".into(),
                streak: 2
            }]
        );
    }

    #[test]
    fn test_single_day_yesterday_no_nudge() {
        let rows = vec![row("yoga", None, None, 1)];
        assert!(summarize(&rows, today()).nudges.is_empty());
    }

    #[test]
    fn test_gap_breaks_streak() {
        let rows = vec![
            row("read", None, None, 0),
            row("read", None, None, 2),
            row("read", None, None, 3),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].current_streak, 1);
    }

    #[test]
    fn test_nudges_capped_and_ordered() {
        let mut rows = Vec::new();
        for (name, streak) in [("b", 4), ("d", 2), ("a", 5), ("c", 3)] {
            for ago in 1..=streak {
                rows.push(row(name, None, None, ago));
            }
        }
        let result = summarize(&rows, today());
        let streaks: Vec<u32> = result.nudges.iter().map(|n| n.streak).collect();
        assert_eq!(streaks, vec![5, 4, 3]);
        assert_eq!(result.nudges[0].habit_name, "a");
    }

    #[test]
    fn test_streak_uses_lookback_beyond_summary_window() {
        // 12-day run ending yesterday: only 7..8 of those days are in the count window
        let rows: Vec<LogRow> = (1..=12)
            .map(|ago| row("water", Some(8.0), Some("glasses"), ago))
            .collect();
        let result = summarize(&rows, today());
        assert_eq!(result.nudges[0].streak, 12);
        assert_eq!(result.summary[0].count, 7);
    }

    #[test]
    fn test_grouping_normalizes_names() {
        let rows = vec![
            row("  Yoga ", Some(20.0), None, 0),
            row("yoga", Some(40.0), None, 1),
            row("   ", Some(1.0), None, 0),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary.len(), 1);
        assert_eq!(result.summary[0].habit_name, "yoga");
        assert_eq!(result.summary[0].count, 2);
        assert_eq!(result.summary[0].avg_quantity, Some(30));
    }

    #[test]
    fn test_average_rounds_and_skips_nulls() {
        let rows = vec![
            row("pushups", Some(10.0), None, 0),
            row("pushups", None, None, 1),
            row("pushups", Some(11.0), None, 2),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].avg_quantity, Some(11));

        let rows = vec![row("journal", None, None, 0)];
        assert_eq!(summarize(&rows, today()).summary[0].avg_quantity, None);
    }

    #[test]
    fn test_old_rows_only_feed_streaks() {
        // Logged 10-20 days ago only: nothing in the count window, no summary row
        let rows: Vec<LogRow> = (10..=20)
            .map(|ago| row("swim", Some(1.0), Some("km"), ago))
            .collect();
        let result = summarize(&rows, today());
        assert!(result.summary.is_empty());
        assert!(result.nudges.is_empty());
    }

    #[test]
    fn test_most_frequent_unit() {
        let rows = vec![
            row("run", Some(5.0), Some("km"), 0),
            row("run", Some(3.0), Some("Miles"), 1),
            row("run", Some(4.0), Some("miles"), 2),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].unit.as_deref(), Some("miles"));
        assert_eq!(result.summary[0].unit_display.as_deref(), Some("mi"));
    }

    #[test]
    fn test_unit_tie_goes_to_first_seen_newest_first() {
        // Newest-first iteration sees "hours" first; counts tie 2-2
        let rows = vec![
            row("study", Some(1.0), Some("minutes"), 3),
            row("study", Some(1.0), Some("hours"), 0),
            row("study", Some(1.0), Some("minutes"), 1),
            row("study", Some(1.0), Some("hours"), 2),
        ];
        let result = summarize(&rows, today());
        assert_eq!(result.summary[0].unit.as_deref(), Some("hours"));
        assert_eq!(result.summary[0].unit_display.as_deref(), Some("hr"));
    }

    #[test]
    fn test_summary_sorted_by_name() {
        let rows = vec![
            row("zumba", None, None, 0),
            row("art", None, None, 1),
            row("meditate", None, None, 2),
        ];
        let names: Vec<String> = summarize(&rows, today())
            .summary
            .into_iter()
            .map(|s| s.habit_name)
            .collect();
        assert_eq!(names, vec!["art", "meditate", "zumba"]);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("morning run"), "Morning Run");
        assert_eq!(title_case("  PUSH-UPS "), "Push-Ups");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(unit_display("minutes"), "min");
        assert_eq!(unit_display("Litres"), "L");
        assert_eq!(unit_display("pages"), "pages");
    }

    #[test]
    fn test_consecutive_days() {
        let dates: HashSet<NaiveDate> =
            [days_ago(0), days_ago(1), days_ago(3)].into_iter().collect();
        assert_eq!(consecutive_days(&dates, today()), 2);
        assert_eq!(consecutive_days(&dates, days_ago(2)), 0);
        assert_eq!(consecutive_days(&dates, days_ago(3)), 1);
    }

    #[test]
    fn test_fetch_error_propagates_unchanged() {
        let store = ReadOnlyStore::failing("connection reset by peer");
        let err = get_habit_summary_at(&store, &UserKey::derive("alice"), today()).unwrap_err();
        assert_eq!(err.to_string(), "connection reset by peer");
    }

    #[test]
    fn test_fetch_uses_lookback_and_summarizes() {
        let store = ReadOnlyStore::with_rows(vec![entry("yoga", 0), entry("yoga", 1)]);
        let result = get_habit_summary_at(&store, &UserKey::derive("alice"), today()).unwrap();

        assert_eq!(*store.asked_from.lock().unwrap(), Some(days_ago(STREAK_LOOKBACK_DAYS)));
        assert_eq!(result.summary.len(), 1);
        assert_eq!(result.summary[0].current_streak, 2);
        assert_eq!(result.summary[0].unit_display.as_deref(), Some("min"));
    }
}
