//! Global per-user hourly window for addressed turns.
//!
//! Decisions come from an in-memory `(count, window_start)` map; every
//! decision is also recorded durably so the window survives a restart
//! (the map lazily rebuilds from the rows).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rusqlite::params;
use tracing::debug;

use gryag_memory::Db;

use crate::error::Result;

/// Reserved feature name for addressed-turn accounting rows.
const TURN_FEATURE: &str = "turns";

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: DateTime<Utc>,
}

pub struct GlobalRateLimiter {
    db: Db,
    windows: DashMap<i64, Window>,
    max_per_hour: u32,
    admin_ids: Vec<i64>,
}

impl GlobalRateLimiter {
    pub fn new(db: Db, max_per_hour: u32, admin_ids: Vec<i64>) -> Self {
        Self {
            db,
            windows: DashMap::new(),
            max_per_hour,
            admin_ids,
        }
    }

    /// Admit or reject an addressed turn for `user_id`. Either way the
    /// decision is recorded.
    pub fn allow(&self, user_id: i64) -> Result<bool> {
        self.allow_at(user_id, Utc::now())
    }

    pub fn allow_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        if self.admin_ids.contains(&user_id) {
            return Ok(true);
        }

        let mut entry = self.windows.entry(user_id).or_insert_with(|| {
            self.rebuild_window(user_id, now).unwrap_or(Window {
                count: 0,
                window_start: now,
            })
        });

        if now - entry.window_start > Duration::hours(1) {
            entry.count = 0;
            entry.window_start = now;
        }

        let allowed = entry.count < self.max_per_hour;
        if allowed {
            entry.count += 1;
        }
        drop(entry);

        self.record(user_id, now, !allowed)?;
        if !allowed {
            debug!(user_id, "global quota exceeded");
        }
        Ok(allowed)
    }

    /// Allowed turns recorded in the trailing hour (admin /chatinfo).
    pub fn used_last_hour(&self, user_id: i64, now: DateTime<Utc>) -> Result<u32> {
        let since = (now - Duration::hours(1)).to_rfc3339();
        let n = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM feature_usage
                 WHERE user_id = ?1 AND feature = ?2 AND throttled = 0
                   AND requested_at > ?3",
                params![user_id, TURN_FEATURE, since],
                |row| row.get::<_, i64>(0),
            )
        })?;
        Ok(n as u32)
    }

    fn rebuild_window(&self, user_id: i64, now: DateTime<Utc>) -> Result<Window> {
        let since = (now - Duration::hours(1)).to_rfc3339();
        let (count, earliest) = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), MIN(requested_at) FROM feature_usage
                 WHERE user_id = ?1 AND feature = ?2 AND throttled = 0
                   AND requested_at > ?3",
                params![user_id, TURN_FEATURE, since],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
        })?;
        let window_start = earliest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        Ok(Window {
            count: count as u32,
            window_start,
        })
    }

    fn record(&self, user_id: i64, now: DateTime<Utc>, throttled: bool) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feature_usage (user_id, feature, requested_at, throttled)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, TURN_FEATURE, now.to_rfc3339(), throttled as i64],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn limiter(max: u32, admins: Vec<i64>) -> GlobalRateLimiter {
        let db = Db::open_in_memory().unwrap();
        init_db(&db).unwrap();
        GlobalRateLimiter::new(db, max, admins)
    }

    #[test]
    fn three_allowed_then_throttled() {
        let l = limiter(3, vec![]);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(l.allow_at(50, now).unwrap());
        }
        assert!(!l.allow_at(50, now).unwrap());
        // 3 allowed + 1 throttled row in the history.
        assert_eq!(l.used_last_hour(50, now).unwrap(), 3);
        let throttled: i64 = l
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM feature_usage WHERE user_id = 50 AND throttled = 1",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(throttled, 1);
    }

    #[test]
    fn window_resets_after_an_hour() {
        let l = limiter(1, vec![]);
        let now = Utc::now();
        assert!(l.allow_at(50, now).unwrap());
        assert!(!l.allow_at(50, now).unwrap());
        assert!(l.allow_at(50, now + Duration::minutes(61)).unwrap());
    }

    #[test]
    fn admins_bypass() {
        let l = limiter(0, vec![99]);
        assert!(l.allow_at(99, Utc::now()).unwrap());
    }

    #[test]
    fn window_survives_map_loss() {
        let l = limiter(3, vec![]);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(l.allow_at(50, now).unwrap());
        }
        // Simulate a restart by clearing the in-memory map; the durable
        // history keeps the user throttled.
        l.windows.clear();
        assert!(!l.allow_at(50, now).unwrap());
    }
}
