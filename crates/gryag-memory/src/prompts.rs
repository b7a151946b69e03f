//! System prompt repository and resolver.
//!
//! Resolution order for a turn: personal(user) → chat → global, first active
//! hit wins. Lookups go through a TTL cache; any write invalidates the whole
//! cache, which is cheap at this size and removes staleness reasoning.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::{PromptScope, SystemPrompt};

/// Cached scope lookups expire after an hour.
const CACHE_TTL: Duration = Duration::hours(1);

type CacheKey = (PromptScope, Option<i64>);

pub struct PromptStore {
    db: Db,
    cache: Mutex<HashMap<CacheKey, (Option<String>, DateTime<Utc>)>>,
}

impl PromptStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Activate a new prompt in `scope`. The previous active row in that
    /// scope is deactivated first, inside one transaction.
    pub fn set_prompt(
        &self,
        admin_id: i64,
        scope: PromptScope,
        chat_id: Option<i64>,
        text: &str,
    ) -> Result<i64> {
        let id = {
            let mut conn = self.db.lock();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE system_prompts SET is_active = 0, updated_at = ?1
                 WHERE scope = ?2 AND chat_id IS ?3 AND is_active = 1",
                params![now, scope.as_str(), scope_key(scope, chat_id, admin_id)],
            )?;
            let version: u32 = tx
                .query_row(
                    "SELECT COALESCE(MAX(version), 0) + 1 FROM system_prompts
                     WHERE scope = ?1 AND chat_id IS ?2",
                    params![scope.as_str(), scope_key(scope, chat_id, admin_id)],
                    |row| row.get(0),
                )?;
            tx.execute(
                "INSERT INTO system_prompts
                 (admin_id, chat_id, scope, prompt_text, is_active, version,
                  created_at, updated_at, activated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6, ?6)",
                params![
                    admin_id,
                    scope_key(scope, chat_id, admin_id),
                    scope.as_str(),
                    text,
                    version,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            id
        };
        self.invalidate();
        Ok(id)
    }

    /// Deactivate a prompt by id; the resolver falls back to the next scope.
    pub fn deactivate_prompt(&self, id: i64) -> Result<bool> {
        let changed = {
            let conn = self.db.lock();
            conn.execute(
                "UPDATE system_prompts SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?
        };
        self.invalidate();
        Ok(changed > 0)
    }

    /// Resolve the effective prompt for a turn: personal → chat → global.
    pub fn resolve(&self, chat_id: i64, user_id: Option<i64>) -> Result<Option<String>> {
        if let Some(uid) = user_id {
            if let Some(text) = self.lookup(PromptScope::Personal, Some(uid))? {
                return Ok(Some(text));
            }
        }
        if let Some(text) = self.lookup(PromptScope::Chat, Some(chat_id))? {
            return Ok(Some(text));
        }
        self.lookup(PromptScope::Global, None)
    }

    /// All prompt rows in a scope, newest version first (admin listing).
    pub fn list(&self, scope: PromptScope, chat_id: Option<i64>) -> Result<Vec<SystemPrompt>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM system_prompts WHERE scope = ?1 AND chat_id IS ?2
             ORDER BY version DESC",
        )?;
        let rows = stmt.query_map(params![scope.as_str(), chat_id], row_to_prompt)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn lookup(&self, scope: PromptScope, key_id: Option<i64>) -> Result<Option<String>> {
        let key = (scope, key_id);
        {
            let cache = self.cache.lock().unwrap();
            if let Some((text, cached_at)) = cache.get(&key) {
                if Utc::now() - *cached_at < CACHE_TTL {
                    return Ok(text.clone());
                }
            }
        }

        let text: Option<String> = {
            let conn = self.db.lock();
            conn.query_row(
                "SELECT prompt_text FROM system_prompts
                 WHERE scope = ?1 AND chat_id IS ?2 AND is_active = 1
                 LIMIT 1",
                params![scope.as_str(), key_id],
                |row| row.get(0),
            )
            .optional()?
        };

        self.cache
            .lock()
            .unwrap()
            .insert(key, (text.clone(), Utc::now()));
        Ok(text)
    }

    fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
    }
}

/// Which id the `chat_id` column carries per scope: global rows carry NULL,
/// chat rows the chat id, personal rows the owner's user id.
fn scope_key(scope: PromptScope, chat_id: Option<i64>, admin_id: i64) -> Option<i64> {
    match scope {
        PromptScope::Global => None,
        PromptScope::Chat => chat_id,
        PromptScope::Personal => Some(admin_id),
    }
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<SystemPrompt> {
    let scope: String = row.get("scope")?;
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    let activated: Option<String> = row.get("activated_at")?;
    Ok(SystemPrompt {
        id: row.get("id")?,
        admin_id: row.get("admin_id")?,
        chat_id: row.get("chat_id")?,
        scope: scope.parse().unwrap_or(PromptScope::Global),
        prompt_text: row.get("prompt_text")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        version: row.get("version")?,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
        activated_at: activated.as_deref().map(parse_ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PromptStore {
        PromptStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn scope_resolution_order() {
        let s = store();
        s.set_prompt(1, PromptScope::Global, None, "глобальний").unwrap();
        s.set_prompt(1, PromptScope::Chat, Some(300), "чатовий").unwrap();

        assert_eq!(s.resolve(300, Some(42)).unwrap().unwrap(), "чатовий");
        assert_eq!(s.resolve(301, Some(42)).unwrap().unwrap(), "глобальний");

        s.set_prompt(42, PromptScope::Personal, None, "особистий").unwrap();
        assert_eq!(s.resolve(300, Some(42)).unwrap().unwrap(), "особистий");
        assert_eq!(s.resolve(300, Some(43)).unwrap().unwrap(), "чатовий");
    }

    #[test]
    fn deactivate_falls_back_to_next_scope() {
        let s = store();
        s.set_prompt(1, PromptScope::Global, None, "глобальний").unwrap();
        let chat_prompt = s.set_prompt(1, PromptScope::Chat, Some(300), "чатовий").unwrap();
        assert_eq!(s.resolve(300, None).unwrap().unwrap(), "чатовий");

        assert!(s.deactivate_prompt(chat_prompt).unwrap());
        assert_eq!(s.resolve(300, None).unwrap().unwrap(), "глобальний");
    }

    #[test]
    fn set_prompt_keeps_one_active_per_scope() {
        let s = store();
        s.set_prompt(1, PromptScope::Global, None, "v1").unwrap();
        s.set_prompt(1, PromptScope::Global, None, "v2").unwrap();
        let rows = s.list(PromptScope::Global, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|p| p.is_active).count(), 1);
        assert_eq!(s.resolve(1, None).unwrap().unwrap(), "v2");
        assert_eq!(rows[0].version, 2);
    }

    #[test]
    fn cache_is_invalidated_by_writes() {
        let s = store();
        s.set_prompt(1, PromptScope::Global, None, "перший").unwrap();
        // Prime the cache.
        assert_eq!(s.resolve(1, None).unwrap().unwrap(), "перший");
        s.set_prompt(1, PromptScope::Global, None, "другий").unwrap();
        assert_eq!(s.resolve(1, None).unwrap().unwrap(), "другий");
    }

    #[test]
    fn no_prompts_resolves_to_none() {
        let s = store();
        assert!(s.resolve(1, Some(2)).unwrap().is_none());
    }
}
