//! The store projector (spec §4.5): materializes a `BatchPlan` into
//! `graph.referrals`, `graph.friendships`, `graph.transaction_logs`, and
//! transitions on `graph.friendships.status` for unfriend events, inside
//! one transaction per batch with deadlock-aware retry.

use crate::models::{FriendshipStatus, NewFriendship, NewReferral, NewTransactionLog};
use crate::retry;
use crate::QueryResult;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::PgConnection;
use log::warn;

/// A canonicalized unordered pair of user ids, `user1 < user2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FriendPair {
    pub user1_id: i64,
    pub user2_id: i64,
}

impl FriendPair {
    pub fn canonicalize(a: i64, b: i64) -> Self {
        if a < b {
            FriendPair { user1_id: a, user2_id: b }
        } else {
            FriendPair { user1_id: b, user2_id: a }
        }
    }
}

/// A resolved-id view of a `BatchPlan`, ready to commit. Produced by the
/// worker crate's planner once names have been resolved via the
/// identity cache. `friend_events` carries `AddFriend`/`Unfriend` events
/// in input order — a pair can appear under both kinds in the same
/// batch, and only its last occurrence decides the terminal status
/// (`true` = add, `false` = unfriend).
pub struct ResolvedBatch {
    pub referrals: Vec<(i64, i64)>,
    pub friend_events: Vec<(FriendPair, bool)>,
    pub logs: Vec<NewTransactionLog>,
}

const TRANSACTION_TIMEOUT_SECONDS: i64 = 60;
const MAX_DEADLOCK_RETRIES: u32 = 5;

/// Commits a resolved batch in one `READ COMMITTED` transaction, retrying
/// the whole transaction on deadlock up to `MAX_DEADLOCK_RETRIES` times.
pub fn project_batch(conn: &mut PgConnection, batch: &ResolvedBatch) -> QueryResult<()> {
    let mut attempt = 0;
    loop {
        let result = conn
            .build_transaction()
            .read_committed()
            .run(|conn| project_batch_once(conn, batch));

        match result {
            Ok(()) => return Ok(()),
            Err(err) if retry::is_deadlock(&err) && attempt < MAX_DEADLOCK_RETRIES => {
                warn!("deadlock committing batch, retrying (attempt {attempt}): {err}");
                std::thread::sleep(retry::backoff(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn project_batch_once(conn: &mut PgConnection, batch: &ResolvedBatch) -> QueryResult<()> {
    set_transaction_timeout(conn, TRANSACTION_TIMEOUT_SECONDS)?;

    // Referrals never conflict with anything else and drain quickly, so
    // they go first. The friend pairs are resolved to a single terminal
    // state per pair before either the upsert or the guarded update runs,
    // so a pair can never be targeted by both statements.
    let (active_pairs, inactive_pairs) = resolve_terminal_friend_state(&batch.friend_events);

    insert_referrals(conn, &batch.referrals)?;
    upsert_friendships(conn, &active_pairs)?;
    update_unfriendships(conn, &inactive_pairs)?;
    insert_transaction_logs(conn, &batch.logs)?;

    Ok(())
}

/// Determines each canonical pair's terminal status from a batch's
/// interleaved `AddFriend`/`Unfriend` events, in input order: whichever
/// event is last for a given pair decides whether it ends up `ACTIVE`
/// (routed to the upsert) or `INACTIVE` (routed to the guarded update).
/// This also collapses duplicates — a pair appears in exactly one of the
/// two returned lists, at most once, so neither downstream statement can
/// ever target the same conflict key twice.
fn resolve_terminal_friend_state(events: &[(FriendPair, bool)]) -> (Vec<FriendPair>, Vec<FriendPair>) {
    let mut terminal = std::collections::HashMap::with_capacity(events.len());
    for (pair, is_add) in events {
        terminal.insert(*pair, *is_add);
    }

    let mut active = Vec::new();
    let mut inactive = Vec::new();
    for (pair, is_add) in terminal {
        if is_add {
            active.push(pair);
        } else {
            inactive.push(pair);
        }
    }

    (active, inactive)
}

fn set_transaction_timeout(conn: &mut PgConnection, seconds: i64) -> QueryResult<()> {
    diesel::sql_query(format!("set local statement_timeout = '{seconds}s'")).execute(conn)?;
    Ok(())
}

/// Bulk insert, skipping duplicates by `(referrer_id, referred_id)`.
fn insert_referrals(conn: &mut PgConnection, referrals: &[(i64, i64)]) -> QueryResult<usize> {
    use crate::schema::graph::referrals::dsl;

    if referrals.is_empty() {
        return Ok(0);
    }

    let new_referrals: Vec<NewReferral> = referrals
        .iter()
        .map(|(referrer_id, referred_id)| NewReferral {
            referrer_id: *referrer_id,
            referred_id: *referred_id,
        })
        .collect();

    diesel::insert_into(dsl::referrals)
        .values(&new_referrals)
        .on_conflict((dsl::referrer_id, dsl::referred_id))
        .do_nothing()
        .execute(conn)
}

/// Bulk upsert keyed on `(user1_id, user2_id)`; inserts as `ACTIVE`, and
/// on conflict sets the row back to `ACTIVE`. `pairs` must not contain the
/// same pair twice — Postgres rejects a single `INSERT ... ON CONFLICT DO
/// UPDATE` that targets the same conflict key more than once ("cannot
/// affect row a second time"); callers resolve each pair to one terminal
/// occurrence first (see `resolve_terminal_friend_state`).
fn upsert_friendships(conn: &mut PgConnection, pairs: &[FriendPair]) -> QueryResult<usize> {
    use crate::schema::graph::friendships::dsl;

    if pairs.is_empty() {
        return Ok(0);
    }

    let new_friendships: Vec<NewFriendship> = pairs
        .iter()
        .map(|pair| NewFriendship {
            user1_id: pair.user1_id,
            user2_id: pair.user2_id,
            status: FriendshipStatus::Active.as_str().to_string(),
        })
        .collect();

    diesel::insert_into(dsl::friendships)
        .values(&new_friendships)
        .on_conflict((dsl::user1_id, dsl::user2_id))
        .do_update()
        .set((
            dsl::status.eq(FriendshipStatus::Active.as_str()),
            dsl::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
}

/// Sets `status = INACTIVE` for existing `ACTIVE` rows matching the
/// given pairs, in one statement via `unnest` over the two id columns.
/// Pairs with no existing `ACTIVE` row are silently ignored — an
/// `Unfriend` for a pair that was never (actively) friends is a no-op,
/// per spec's guarded-transition mandate.
fn update_unfriendships(conn: &mut PgConnection, pairs: &[FriendPair]) -> QueryResult<usize> {
    if pairs.is_empty() {
        return Ok(0);
    }

    let user1_ids: Vec<i64> = pairs.iter().map(|p| p.user1_id).collect();
    let user2_ids: Vec<i64> = pairs.iter().map(|p| p.user2_id).collect();

    diesel::sql_query(
        "with pairs as ( \
             select * from unnest($1::bigint[], $2::bigint[]) as p(user1_id, user2_id) \
         ) \
         update graph.friendships f \
         set status = 'INACTIVE', updated_at = now() \
         from pairs \
         where f.user1_id = pairs.user1_id \
           and f.user2_id = pairs.user2_id \
           and f.status = 'ACTIVE'",
    )
    .bind::<diesel::sql_types::Array<BigInt>, _>(user1_ids)
    .bind::<diesel::sql_types::Array<BigInt>, _>(user2_ids)
    .execute(conn)
}

/// Bulk insert, never deduplicated — one row per decoded event.
fn insert_transaction_logs(
    conn: &mut PgConnection,
    logs: &[NewTransactionLog],
) -> QueryResult<usize> {
    use crate::schema::graph::transaction_logs::dsl;

    if logs.is_empty() {
        return Ok(0);
    }

    diesel::insert_into(dsl::transaction_logs)
        .values(logs)
        .execute(conn)
}

/// Renders the friendship upsert's generated SQL for tests, since this
/// environment has no live connection to exercise against.
#[allow(dead_code)]
pub(crate) fn debug_upsert_query_shape(pairs: &[FriendPair]) -> String {
    use crate::schema::graph::friendships::dsl;

    let new_friendships: Vec<NewFriendship> = pairs
        .iter()
        .map(|pair| NewFriendship {
            user1_id: pair.user1_id,
            user2_id: pair.user2_id,
            status: FriendshipStatus::Active.as_str().to_string(),
        })
        .collect();

    let query = diesel::insert_into(dsl::friendships)
        .values(new_friendships)
        .on_conflict((dsl::user1_id, dsl::user2_id))
        .do_update()
        .set(dsl::status.eq(FriendshipStatus::Active.as_str()));

    diesel::debug_query::<Pg, _>(&query).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friend_pair_canonicalizes_lower_id_first() {
        let pair = FriendPair::canonicalize(7, 3);
        assert_eq!(pair.user1_id, 3);
        assert_eq!(pair.user2_id, 7);

        let pair = FriendPair::canonicalize(3, 7);
        assert_eq!(pair.user1_id, 3);
        assert_eq!(pair.user2_id, 7);
    }

    #[test]
    fn upsert_query_shape_sets_status_active_on_conflict() {
        let pairs = vec![FriendPair::canonicalize(1, 2)];
        let sql = debug_upsert_query_shape(&pairs);
        assert!(sql.to_lowercase().contains("on conflict"));
        assert!(sql.to_lowercase().contains("do update"));
    }

    #[test]
    fn terminal_state_follows_last_event_per_pair() {
        // AddFriend(a,b), Unfriend(a,b), AddFriend(a,b) => terminal ACTIVE,
        // matching spec §8 scenario S3 / property 7.
        let pair = FriendPair::canonicalize(1, 2);
        let events = vec![(pair, true), (pair, false), (pair, true)];

        let (active, inactive) = resolve_terminal_friend_state(&events);

        assert_eq!(active, vec![pair]);
        assert!(inactive.is_empty());
    }

    #[test]
    fn terminal_state_follows_last_event_when_unfriend_wins() {
        let pair = FriendPair::canonicalize(1, 2);
        let events = vec![(pair, true), (pair, false)];

        let (active, inactive) = resolve_terminal_friend_state(&events);

        assert!(active.is_empty());
        assert_eq!(inactive, vec![pair]);
    }

    #[test]
    fn terminal_state_routes_distinct_pairs_independently() {
        let ab = FriendPair::canonicalize(1, 2);
        let cd = FriendPair::canonicalize(3, 4);
        let events = vec![(ab, true), (cd, false)];

        let (active, inactive) = resolve_terminal_friend_state(&events);

        assert_eq!(active, vec![ab]);
        assert_eq!(inactive, vec![cd]);
    }
}
