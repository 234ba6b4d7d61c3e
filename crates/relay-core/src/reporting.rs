//! Day-bucketed usage reporting (spec §6 dashboard, §8 scenario 8).
//!
//! Spec §9's design note calls for one helper that knows how to truncate a
//! timestamp to a billing day, consumed by every reporting query rather than
//! each query growing its own `GROUP BY` expression: [`day_bucket`] for
//! in-memory grouping, [`day_bucket_sql`] for the SQL backend's `GROUP BY`.
//! There is one reporting query today (the dashboard); a second would reuse
//! both.

use crate::model::ConsumeLog;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Truncates a timestamp to the UTC calendar day it falls in.
pub fn day_bucket(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// SQL expression truncating `column` to a billing day under SQLite. A
/// second backend (Postgres/MySQL) would need its own expression behind
/// this same name if one is ever wired in (spec §9).
pub fn day_bucket_sql(column: &str) -> String {
    format!("date({column})")
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DailyUsage {
    pub day: NaiveDate,
    pub request_count: u64,
    pub quota: i64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Groups already-fetched rows by billing day. Used by the in-memory
/// backend, which has no `GROUP BY` of its own to do this in.
pub fn group_by_day(logs: &[ConsumeLog]) -> Vec<DailyUsage> {
    let mut by_day: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();
    for log in logs {
        let day = day_bucket(log.created_at);
        let entry = by_day.entry(day).or_insert(DailyUsage { day, ..Default::default() });
        entry.request_count += 1;
        entry.quota += log.quota;
        entry.prompt_tokens += log.prompt_tokens as u64;
        entry.completion_tokens += log.completion_tokens as u64;
    }
    by_day.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConsumeLog;
    use chrono::TimeZone;

    fn log_at(ts: DateTime<Utc>, user_id: i64, quota: i64) -> ConsumeLog {
        ConsumeLog {
            id: 0,
            user_id,
            username: "alice".into(),
            created_at: ts,
            model_name: "gpt-4".into(),
            token_name: "default".into(),
            channel_id: 1,
            quota,
            prompt_tokens: 10,
            completion_tokens: 5,
            cached_prompt_tokens: 0,
            cached_completion_tokens: 0,
            elapsed_ms: 100,
            is_stream: false,
            request_id: "req".into(),
            trace_id: "trace".into(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn groups_rows_falling_on_the_same_calendar_day() {
        let day1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap();
        let day1_late = Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 59).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let logs = vec![log_at(day1, 1, 100), log_at(day1_late, 1, 50), log_at(day2, 1, 10)];
        let grouped = group_by_day(&logs);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].day, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(grouped[0].quota, 150);
        assert_eq!(grouped[0].request_count, 2);
        assert_eq!(grouped[1].day, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(grouped[1].quota, 10);
    }
}
