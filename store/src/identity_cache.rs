use crate::models::NewUser;
use crate::retry;
use crate::QueryResult;
use dashmap::DashMap;
use diesel::prelude::*;
use diesel::PgConnection;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// In-memory `name -> id` cache backed by the `graph.users` table, with a
/// coarse TTL refresh and a per-name single-flight guard so that
/// concurrent batches resolving the same unknown name only attempt one
/// insert between them.
pub struct IdentityCache {
    cache: RwLock<HashMap<String, i64>>,
    last_refresh: RwLock<Instant>,
    ttl: Duration,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityCache {
    /// Performs the initial full scan of `graph.users` into the cache.
    pub fn connect(conn: &mut PgConnection) -> QueryResult<Self> {
        let cache = Self {
            cache: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(Instant::now()),
            ttl: DEFAULT_TTL,
            inflight: DashMap::new(),
        };

        cache.full_refresh(conn)?;

        Ok(cache)
    }

    #[cfg(test)]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(Instant::now() - ttl - Duration::from_secs(1)),
            ttl,
            inflight: DashMap::new(),
        }
    }

    fn full_refresh(&self, conn: &mut PgConnection) -> QueryResult<()> {
        use crate::schema::graph::users::dsl;

        let rows: Vec<(String, i64)> = dsl::users.select((dsl::name, dsl::id)).load(conn)?;

        let mut snapshot = HashMap::with_capacity(rows.len());
        snapshot.extend(rows);

        // Swapping the whole map under one write-lock hold means readers
        // always observe either the pre-refresh or post-refresh snapshot,
        // never a partially replaced one.
        *self.cache.write().unwrap() = snapshot;
        *self.last_refresh.write().unwrap() = Instant::now();

        Ok(())
    }

    /// Re-scans the user table if more than the TTL has elapsed since the
    /// last refresh.
    pub fn refresh_if_stale(&self, conn: &mut PgConnection) -> QueryResult<()> {
        let is_stale = self.last_refresh.read().unwrap().elapsed() > self.ttl;
        if is_stale {
            debug!("identity cache is stale, refreshing");
            self.full_refresh(conn)?;
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<i64> {
        self.cache.read().unwrap().get(name).copied()
    }

    fn insert(&self, name: String, id: i64) {
        self.cache.write().unwrap().insert(name, id);
    }

    fn slot_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.inflight
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolves every name in `names` to its user id, lazily inserting
    /// rows for names this process hasn't seen before. Concurrent calls
    /// for the same name share one insert attempt via the single-flight
    /// slot.
    pub fn ensure_users_exist(
        &self,
        conn: &mut PgConnection,
        names: &HashSet<String>,
        max_retries: u32,
    ) -> QueryResult<HashMap<String, i64>> {
        let mut resolved = HashMap::with_capacity(names.len());
        let mut misses = Vec::new();

        for name in names {
            match self.get(name) {
                Some(id) => {
                    resolved.insert(name.clone(), id);
                }
                None => misses.push(name.clone()),
            }
        }

        for name in misses {
            let slot = self.slot_for(&name);
            let _guard = slot.lock().unwrap();

            // Another flight may have populated the cache while we were
            // waiting for the slot.
            if let Some(id) = self.get(&name) {
                resolved.insert(name, id);
                continue;
            }

            let id = self.insert_or_lookup_with_retry(conn, &name, max_retries)?;
            self.insert(name.clone(), id);
            resolved.insert(name, id);
        }

        Ok(resolved)
    }

    fn insert_or_lookup_with_retry(
        &self,
        conn: &mut PgConnection,
        name: &str,
        max_retries: u32,
    ) -> QueryResult<i64> {
        let mut attempt = 0;
        loop {
            match self.insert_or_lookup(conn, name) {
                Ok(id) => return Ok(id),
                Err(err) if retry::is_deadlock(&err) && attempt < max_retries => {
                    warn!(
                        "deadlock inserting user {name:?}, retrying (attempt {attempt}): {err}"
                    );
                    std::thread::sleep(retry::backoff(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn insert_or_lookup(&self, conn: &mut PgConnection, name: &str) -> QueryResult<i64> {
        use crate::schema::graph::users::dsl;

        let new_user = NewUser { name };

        let inserted: QueryResult<i64> = diesel::insert_into(dsl::users)
            .values(&new_user)
            .returning(dsl::id)
            .get_result(conn);

        match inserted {
            Ok(id) => Ok(id),
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => dsl::users
                .filter(dsl::name.eq(name))
                .select(dsl::id)
                .first(conn),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_check_respects_ttl() {
        let cache = IdentityCache::with_ttl(Duration::from_secs(30));
        assert!(cache.last_refresh.read().unwrap().elapsed() > cache.ttl);
    }

    #[test]
    fn get_and_insert_round_trip() {
        let cache = IdentityCache::with_ttl(Duration::from_secs(30));
        assert_eq!(cache.get("alice"), None);
        cache.insert("alice".to_string(), 1);
        assert_eq!(cache.get("alice"), Some(1));
    }

    #[test]
    fn single_flight_slots_are_shared_per_name() {
        let cache = IdentityCache::with_ttl(Duration::from_secs(30));
        let a = cache.slot_for("alice");
        let b = cache.slot_for("alice");
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.slot_for("bob");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
