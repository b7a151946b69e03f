//! Per-feature limiter: hourly and daily quotas over durable usage history,
//! scaled by the user's reputation multiplier when adaptive throttling is on.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use rusqlite::params;
use tracing::debug;

use gryag_memory::Db;

use crate::error::Result;

/// Reputation multipliers are clamped to this range.
pub const REPUTATION_MIN: f64 = 0.5;
pub const REPUTATION_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct FeatureQuota {
    pub per_hour: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStats {
    pub used_this_hour: u32,
    pub used_today: u32,
}

pub struct FeatureLimiter {
    db: Db,
    quotas: HashMap<String, FeatureQuota>,
    admin_ids: Vec<i64>,
    enabled: bool,
    adaptive: bool,
}

impl FeatureLimiter {
    pub fn new(
        db: Db,
        quotas: HashMap<String, FeatureQuota>,
        admin_ids: Vec<i64>,
        enabled: bool,
        adaptive: bool,
    ) -> Self {
        Self {
            db,
            quotas,
            admin_ids,
            enabled,
            adaptive,
        }
    }

    /// Admit or reject a feature call. Unknown features fail open; denials
    /// are recorded as throttled events.
    pub fn allow(&self, user_id: i64, feature: &str) -> Result<bool> {
        self.allow_at(user_id, feature, Utc::now())
    }

    pub fn allow_at(&self, user_id: i64, feature: &str, now: DateTime<Utc>) -> Result<bool> {
        if !self.enabled || self.admin_ids.contains(&user_id) {
            return Ok(true);
        }
        let Some(quota) = self.quotas.get(feature) else {
            return Ok(true);
        };

        let multiplier = if self.adaptive {
            self.reputation(user_id)?
        } else {
            1.0
        };
        let adjusted_hour = (quota.per_hour as f64 * multiplier).floor() as u32;
        let adjusted_day = (quota.per_day as f64 * multiplier).floor() as u32;

        let stats = self.usage_at(user_id, feature, now)?;
        let allowed = stats.used_this_hour < adjusted_hour && stats.used_today < adjusted_day;
        if !allowed {
            self.record(user_id, feature, now, true)?;
            debug!(user_id, feature, "feature quota exceeded");
        }
        Ok(allowed)
    }

    /// Record a successful downstream call.
    pub fn record_usage(&self, user_id: i64, feature: &str) -> Result<()> {
        self.record(user_id, feature, Utc::now(), false)
    }

    pub fn record_usage_at(&self, user_id: i64, feature: &str, now: DateTime<Utc>) -> Result<()> {
        self.record(user_id, feature, now, false)
    }

    /// Usage in the aligned hour and day windows.
    pub fn get_usage_stats(&self, user_id: i64, feature: &str) -> Result<UsageStats> {
        self.usage_at(user_id, feature, Utc::now())
    }

    /// Explicit admin operation; values clamp to [0.5, 2.0].
    pub fn set_reputation(&self, user_id: i64, multiplier: f64) -> Result<()> {
        let clamped = multiplier.clamp(REPUTATION_MIN, REPUTATION_MAX);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reputation (user_id, multiplier) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET multiplier = excluded.multiplier",
                params![user_id, clamped],
            )
        })?;
        Ok(())
    }

    pub fn reputation(&self, user_id: i64) -> Result<f64> {
        let m: Option<f64> = self.db.with_conn(|conn| {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT multiplier FROM reputation WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(m.unwrap_or(1.0).clamp(REPUTATION_MIN, REPUTATION_MAX))
    }

    /// Drop usage rows older than the retention horizon.
    pub fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(retention_days as i64)).to_rfc3339();
        let n = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM feature_usage WHERE requested_at < ?1",
                params![cutoff],
            )
        })?;
        Ok(n)
    }

    fn usage_at(&self, user_id: i64, feature: &str, now: DateTime<Utc>) -> Result<UsageStats> {
        let hour_start = aligned_hour(now).to_rfc3339();
        let day_start = aligned_day(now).to_rfc3339();
        let (hour, day) = self.db.with_conn(|conn| {
            let hour: i64 = conn.query_row(
                "SELECT COUNT(*) FROM feature_usage
                 WHERE user_id = ?1 AND feature = ?2 AND throttled = 0
                   AND requested_at >= ?3",
                params![user_id, feature, hour_start],
                |row| row.get(0),
            )?;
            let day: i64 = conn.query_row(
                "SELECT COUNT(*) FROM feature_usage
                 WHERE user_id = ?1 AND feature = ?2 AND throttled = 0
                   AND requested_at >= ?3",
                params![user_id, feature, day_start],
                |row| row.get(0),
            )?;
            Ok((hour, day))
        })?;
        Ok(UsageStats {
            used_this_hour: hour as u32,
            used_today: day as u32,
        })
    }

    fn record(&self, user_id: i64, feature: &str, now: DateTime<Utc>, throttled: bool) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feature_usage (user_id, feature, requested_at, throttled)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, feature, now.to_rfc3339(), throttled as i64],
            )
        })?;
        Ok(())
    }
}

fn aligned_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn aligned_day(now: DateTime<Utc>) -> DateTime<Utc> {
    aligned_hour(now).with_hour(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn limiter(quota: FeatureQuota, adaptive: bool) -> FeatureLimiter {
        let db = Db::open_in_memory().unwrap();
        init_db(&db).unwrap();
        let mut quotas = HashMap::new();
        quotas.insert("weather".to_string(), quota);
        FeatureLimiter::new(db, quotas, vec![777], true, adaptive)
    }

    #[test]
    fn usage_counts_match_recorded_calls() {
        let l = limiter(FeatureQuota { per_hour: 10, per_day: 20 }, false);
        let now = Utc::now();
        for _ in 0..3 {
            l.record_usage_at(42, "weather", now).unwrap();
        }
        let stats = l.get_usage_stats(42, "weather").unwrap();
        assert_eq!(stats.used_this_hour, 3);
        assert_eq!(stats.used_today, 3);
    }

    #[test]
    fn denies_over_hourly_quota() {
        let l = limiter(FeatureQuota { per_hour: 2, per_day: 100 }, false);
        let now = Utc::now();
        assert!(l.allow_at(42, "weather", now).unwrap());
        l.record_usage_at(42, "weather", now).unwrap();
        assert!(l.allow_at(42, "weather", now).unwrap());
        l.record_usage_at(42, "weather", now).unwrap();
        assert!(!l.allow_at(42, "weather", now).unwrap());
    }

    #[test]
    fn unknown_feature_fails_open() {
        let l = limiter(FeatureQuota { per_hour: 0, per_day: 0 }, false);
        assert!(l.allow(42, "mystery").unwrap());
    }

    #[test]
    fn admins_bypass() {
        let l = limiter(FeatureQuota { per_hour: 0, per_day: 0 }, false);
        assert!(l.allow(777, "weather").unwrap());
    }

    #[test]
    fn reputation_scales_quota() {
        let l = limiter(FeatureQuota { per_hour: 2, per_day: 100 }, true);
        let now = Utc::now();
        l.set_reputation(42, 2.0).unwrap();
        for _ in 0..3 {
            assert!(l.allow_at(42, "weather", now).unwrap());
            l.record_usage_at(42, "weather", now).unwrap();
        }
        // 2 × 2.0 = 4 per hour.
        assert!(l.allow_at(42, "weather", now).unwrap());
        l.record_usage_at(42, "weather", now).unwrap();
        assert!(!l.allow_at(42, "weather", now).unwrap());
    }

    #[test]
    fn reputation_is_clamped() {
        let l = limiter(FeatureQuota { per_hour: 1, per_day: 1 }, true);
        l.set_reputation(42, 9.0).unwrap();
        assert!((l.reputation(42).unwrap() - REPUTATION_MAX).abs() < f64::EPSILON);
        l.set_reputation(42, 0.0).unwrap();
        assert!((l.reputation(42).unwrap() - REPUTATION_MIN).abs() < f64::EPSILON);
    }

    #[test]
    fn throttled_events_do_not_count_as_usage() {
        let l = limiter(FeatureQuota { per_hour: 1, per_day: 10 }, false);
        let now = Utc::now();
        l.record_usage_at(42, "weather", now).unwrap();
        assert!(!l.allow_at(42, "weather", now).unwrap());
        assert!(!l.allow_at(42, "weather", now).unwrap());
        assert_eq!(l.get_usage_stats(42, "weather").unwrap().used_this_hour, 1);
    }

    #[test]
    fn prune_removes_old_rows() {
        let l = limiter(FeatureQuota { per_hour: 10, per_day: 10 }, false);
        l.record_usage_at(42, "weather", Utc::now() - Duration::days(10))
            .unwrap();
        l.record_usage_at(42, "weather", Utc::now()).unwrap();
        assert_eq!(l.prune(7).unwrap(), 1);
    }
}
