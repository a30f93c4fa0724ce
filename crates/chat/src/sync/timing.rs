//! Refresh timing helpers
//!
//! Pure functions so they can be tested without a clock.

use chrono::{DateTime, Utc};

/// Whether at least `cooldown_secs` passed between `last` and `now`
///
/// Never having refreshed counts as elapsed.
pub fn cooldown_elapsed(
    last: Option<DateTime<Utc>>,
    cooldown_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    match last {
        Some(last) => (now - last).num_seconds() >= cooldown_secs as i64,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_never_refreshed() {
        assert!(cooldown_elapsed(None, 3, Utc::now()));
    }

    #[test]
    fn test_within_cooldown() {
        let now = Utc::now();
        assert!(!cooldown_elapsed(Some(now - Duration::seconds(1)), 3, now));
        assert!(cooldown_elapsed(Some(now - Duration::seconds(3)), 3, now));
    }

    #[test]
    fn test_zero_cooldown() {
        let now = Utc::now();
        assert!(cooldown_elapsed(Some(now), 0, now));
    }
}
