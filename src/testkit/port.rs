//! Free local port discovery.
//!
//! Linux only lets a port be reused after `TIME_WAIT`, while macOS allows
//! simultaneous binds from several processes. Sequential searches are
//! therefore more likely to collide on macOS; the random strategies spread
//! tests across the range.

use rand::Rng;
use std::net::{Ipv4Addr, TcpListener};
use tracing::trace;

use crate::error::HarnessError;

/// Random candidates tried before a random search gives up.
const RANDOM_ATTEMPTS: usize = 1000;

/// How to look for a port to start a server under test on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortSearch {
    /// First open port above the start port (exclusive).
    Above,
    /// First open port from the start port (inclusive).
    From,
    /// Random open port above the start port (exclusive).
    #[default]
    RandomAbove,
    /// Random open port from the start port (inclusive).
    RandomFrom,
}

impl PortSearch {
    /// Lowest candidate for a given start port, if any exists.
    fn lowest(self, start: u16) -> Option<u16> {
        match self {
            PortSearch::Above | PortSearch::RandomAbove => start.checked_add(1),
            PortSearch::From | PortSearch::RandomFrom => Some(start),
        }
    }

    fn is_random(self) -> bool {
        matches!(self, PortSearch::RandomAbove | PortSearch::RandomFrom)
    }
}

/// Whether a listener can currently be bound on `127.0.0.1:<port>`.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Find an open port using `strategy`, starting from `start`.
pub fn find_open_port(strategy: PortSearch, start: u16) -> Result<u16, HarnessError> {
    find_port_matching(strategy, start, is_port_free)
}

/// Search with an arbitrary "is this port free" predicate.
pub fn find_port_matching<F>(strategy: PortSearch, start: u16, mut is_free: F) -> Result<u16, HarnessError>
where
    F: FnMut(u16) -> bool,
{
    if start == 0 {
        return Err(HarnessError::InvalidConfig(
            "start port must be a valid non-zero port between 1 and 65535".into(),
        ));
    }

    let exhausted = HarnessError::PortSearchExhausted { strategy, start };
    let Some(low) = strategy.lowest(start) else {
        return Err(exhausted);
    };

    let found = if strategy.is_random() {
        let mut rng = rand::thread_rng();
        (0..RANDOM_ATTEMPTS)
            .map(|_| rng.gen_range(low..=u16::MAX))
            .find(|&port| is_free(port))
    } else {
        (low..=u16::MAX).find(|&port| is_free(port))
    };

    match found {
        Some(port) => {
            trace!(port, ?strategy, "Found open port");
            Ok(port)
        }
        None => Err(exhausted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_above_excludes_start() {
        let port = find_port_matching(PortSearch::Above, 20_000, |_| true).unwrap();
        assert_eq!(port, 20_001);
    }

    #[test]
    fn test_from_includes_start() {
        let port = find_port_matching(PortSearch::From, 20_000, |_| true).unwrap();
        assert_eq!(port, 20_000);
    }

    #[test]
    fn test_sequential_skips_busy_ports() {
        let port = find_port_matching(PortSearch::From, 20_000, |p| p >= 20_005).unwrap();
        assert_eq!(port, 20_005);
    }

    #[test]
    fn test_random_stays_in_range() {
        for _ in 0..100 {
            let port = find_port_matching(PortSearch::RandomAbove, 60_000, |_| true).unwrap();
            assert!(port > 60_000);

            let port = find_port_matching(PortSearch::RandomFrom, 60_000, |_| true).unwrap();
            assert!(port >= 60_000);
        }
    }

    #[test]
    fn test_random_from_top_port() {
        let port = find_port_matching(PortSearch::RandomFrom, u16::MAX, |_| true).unwrap();
        assert_eq!(port, u16::MAX);
    }

    #[test]
    fn test_above_top_port_is_exhausted() {
        let err = find_port_matching(PortSearch::Above, u16::MAX, |_| true).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::PortSearchExhausted {
                strategy: PortSearch::Above,
                start: u16::MAX
            }
        ));
    }

    #[test]
    fn test_no_free_port_is_exhausted() {
        for strategy in [
            PortSearch::Above,
            PortSearch::From,
            PortSearch::RandomAbove,
            PortSearch::RandomFrom,
        ] {
            let err = find_port_matching(strategy, 65_000, |_| false).unwrap_err();
            assert!(matches!(err, HarnessError::PortSearchExhausted { .. }));
        }
    }

    #[test]
    fn test_zero_start_port_rejected() {
        let err = find_port_matching(PortSearch::From, 0, |_| true).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn test_default_strategy_is_random_above() {
        assert_eq!(PortSearch::default(), PortSearch::RandomAbove);
    }

    #[test]
    fn test_finds_real_open_port() {
        let port = find_open_port(PortSearch::RandomAbove, 16_384).unwrap();
        assert!(port > 16_384);
    }

    #[test]
    fn test_bound_port_is_not_free() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(port));
    }
}
