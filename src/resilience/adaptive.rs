//! Adaptive failure threshold.
//!
//! Timeouts suggest an overloaded dependency, so the breaker trips sooner.
//! Connection errors are often transient blips, so it tolerates one more.

use crate::error::ErrorKind;

/// Number of most recent failures inspected.
pub const ADAPTIVE_WINDOW: usize = 10;

/// Lowest threshold the timeout adjustment can produce.
pub const MIN_ADAPTIVE_THRESHOLD: u32 = 3;

/// Threshold derived from `base` and the kinds of the most recent failures,
/// oldest first.
pub fn adaptive_threshold<'a, I>(base: u32, recent_kinds: I) -> u32
where
    I: DoubleEndedIterator<Item = &'a ErrorKind>,
{
    let mut timeout = false;
    let mut connection = false;
    for kind in recent_kinds.rev().take(ADAPTIVE_WINDOW) {
        match kind {
            ErrorKind::Timeout => timeout = true,
            ErrorKind::Connection => connection = true,
            _ => {}
        }
    }

    if timeout {
        base.saturating_sub(2).max(MIN_ADAPTIVE_THRESHOLD)
    } else if connection {
        base.saturating_add(1)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_lowers_with_floor() {
        let kinds = [ErrorKind::Transport, ErrorKind::Timeout];
        assert_eq!(adaptive_threshold(8, kinds.iter()), 6);
        assert_eq!(adaptive_threshold(4, kinds.iter()), 3);
        assert_eq!(adaptive_threshold(2, kinds.iter()), 3);
    }

    #[test]
    fn test_connection_raises() {
        let kinds = [ErrorKind::Connection, ErrorKind::Transport];
        assert_eq!(adaptive_threshold(5, kinds.iter()), 6);
    }

    #[test]
    fn test_timeout_wins_over_connection() {
        let kinds = [ErrorKind::Connection, ErrorKind::Timeout];
        assert_eq!(adaptive_threshold(5, kinds.iter()), 3);
    }

    #[test]
    fn test_only_last_ten_considered() {
        let mut kinds = vec![ErrorKind::Timeout];
        kinds.extend(std::iter::repeat(ErrorKind::Transport).take(10));
        assert_eq!(adaptive_threshold(5, kinds.iter()), 5);
    }

    #[test]
    fn test_reads_kinds_from_failure_records() {
        use crate::resilience::circuit_breaker::FailureRecord;

        let history: Vec<FailureRecord> = [ErrorKind::Transport, ErrorKind::Connection]
            .into_iter()
            .map(|kind| FailureRecord {
                at_ms: 0,
                kind,
                latency_ms: 12,
            })
            .collect();
        assert_eq!(adaptive_threshold(5, history.iter().map(|f| &f.kind)), 6);
    }
}
