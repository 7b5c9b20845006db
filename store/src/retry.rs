use rand::Rng;
use std::time::Duration;

/// `100ms * 2^attempt + jitter[0, 100ms)`, the backoff shape specified for
/// both the identity-cache insert retry and the store projector's
/// deadlock retry.
pub fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_millis(100) * 2u32.saturating_pow(attempt);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
    base + jitter
}

/// Postgres SQLSTATE `40P01` (deadlock_detected), or any database error
/// whose message mentions "deadlock detected" (covers `sql_query` escape
/// hatches and drivers that don't surface a structured code).
pub fn is_deadlock(err: &diesel::result::Error) -> bool {
    match err {
        diesel::result::Error::DatabaseError(_, info) => {
            info.code().map(|c| c.as_ref() == "40P01").unwrap_or(false)
                || info.message().contains("deadlock detected")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_jitter_bound() {
        for attempt in 0..5 {
            let d = backoff(attempt);
            let base = Duration::from_millis(100) * 2u32.pow(attempt);
            assert!(d >= base);
            assert!(d < base + Duration::from_millis(100));
        }
    }
}
