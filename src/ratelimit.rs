//! Per-address connection cooldown.
//!
//! An address with a live entry cannot open a second session. Entries are
//! released as soon as the owning connection closes, so the window only
//! bounds overlapping connections from one address; a client that closes and
//! reconnects immediately is let through.
//!
//! Each admitted connection holds a [`Lease`]. Releasing a lease only drops
//! the entry if that connection still owns it: once the window has lapsed
//! and a later connection took the entry over, the earlier one closing
//! leaves it alone.
//!
//! The table is a `DashMap`, so checks for different addresses never contend
//! on a single lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Clock abstraction for testability.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real clock using std::time::Instant.
#[derive(Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cooldown entry for one address
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    /// Connection attempts seen while the entry was live
    pub attempts: u32,
    pub expires_at: Instant,
    /// Connection that currently owns the entry
    owner: u64,
}

/// Proof that one connection was admitted for `addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub addr: IpAddr,
    token: u64,
}

/// Address-keyed connection limiter
pub struct RateLimiter<C: Clock = RealClock> {
    entries: DashMap<IpAddr, RateLimitEntry>,
    next_token: AtomicU64,
    window: Duration,
    enabled: bool,
    clock: C,
}

impl RateLimiter<RealClock> {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, RealClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            next_token: AtomicU64::new(1),
            window: config.window(),
            enabled: config.enabled,
            clock,
        }
    }

    /// True if a new session from `addr` is allowed right now
    pub fn check(&self, addr: IpAddr) -> bool {
        if !self.enabled {
            return true;
        }
        let now = self.clock.now();
        match self.entries.get(&addr) {
            Some(entry) => entry.expires_at <= now,
            None => true,
        }
    }

    fn lease(&self, addr: IpAddr) -> Lease {
        Lease {
            addr,
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Record a session for `addr`, starting a fresh window owned by the returned lease
    pub fn record(&self, addr: IpAddr) -> Lease {
        let lease = self.lease(addr);
        if !self.enabled {
            return lease;
        }
        let expires_at = self.clock.now() + self.window;
        self.entries
            .entry(addr)
            .and_modify(|e| {
                e.attempts += 1;
                e.expires_at = expires_at;
                e.owner = lease.token;
            })
            .or_insert(RateLimitEntry {
                attempts: 1,
                expires_at,
                owner: lease.token,
            });
        lease
    }

    /// Check and record in one step. Returns None when the address is cooling down.
    pub fn try_acquire(&self, addr: IpAddr) -> Option<Lease> {
        let lease = self.lease(addr);
        if !self.enabled {
            return Some(lease);
        }
        let now = self.clock.now();
        let fresh = RateLimitEntry {
            attempts: 1,
            expires_at: now + self.window,
            owner: lease.token,
        };
        match self.entries.entry(addr) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at > now {
                    entry.attempts += 1;
                    debug!("Rejecting {} ({} attempts in window)", addr, entry.attempts);
                    return None;
                }
                *entry = fresh;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
        Some(lease)
    }

    /// Drop the lease's entry immediately, unless another connection owns it by now
    pub fn release(&self, lease: Lease) {
        if self
            .entries
            .remove_if(&lease.addr, |_, e| e.owner == lease.token)
            .is_none()
        {
            debug!("Entry for {} no longer held by this connection", lease.addr);
        }
    }

    /// Remove expired entries. An expired entry no longer blocks anyone, so
    /// dropping it while its connection is still open changes nothing.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn entry(&self, addr: IpAddr) -> Option<RateLimitEntry> {
        self.entries.get(&addr).map(|e| *e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Mock clock for deterministic testing.
    struct MockClock {
        base: Instant,
        offset_nanos: Arc<AtomicU64>,
    }

    impl MockClock {
        fn new() -> (Self, Arc<AtomicU64>) {
            let offset_nanos = Arc::new(AtomicU64::new(0));
            (
                Self {
                    base: Instant::now(),
                    offset_nanos: offset_nanos.clone(),
                },
                offset_nanos,
            )
        }

        fn advance(offset_nanos: &Arc<AtomicU64>, duration: Duration) {
            offset_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
        }
    }

    fn config(window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window_secs,
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_second_connection_within_window_rejected() {
        let (clock, _offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(120), clock);

        assert!(limiter.try_acquire(addr(1)).is_some());
        assert!(limiter.try_acquire(addr(1)).is_none());
        assert_eq!(limiter.entry(addr(1)).unwrap().attempts, 2);
    }

    #[test]
    fn test_release_allows_immediate_reconnect() {
        let (clock, _offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(120), clock);

        let lease = limiter.try_acquire(addr(1)).unwrap();
        limiter.release(lease);
        assert!(limiter.try_acquire(addr(1)).is_some());
    }

    #[test]
    fn test_stale_release_keeps_newer_entry() {
        let (clock, offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(120), clock);

        let first = limiter.try_acquire(addr(1)).unwrap();
        MockClock::advance(&offset, Duration::from_secs(121));
        let second = limiter.try_acquire(addr(1)).unwrap();

        limiter.release(first);
        assert!(limiter.try_acquire(addr(1)).is_none());

        limiter.release(second);
        assert!(limiter.try_acquire(addr(1)).is_some());
    }

    #[test]
    fn test_entry_expires_after_window() {
        let (clock, offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(120), clock);

        assert!(limiter.try_acquire(addr(1)).is_some());
        MockClock::advance(&offset, Duration::from_secs(119));
        assert!(!limiter.check(addr(1)));
        MockClock::advance(&offset, Duration::from_secs(1));
        assert!(limiter.check(addr(1)));
        assert!(limiter.try_acquire(addr(1)).is_some());
    }

    #[test]
    fn test_addresses_are_independent() {
        let (clock, _offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(120), clock);

        assert!(limiter.try_acquire(addr(1)).is_some());
        assert!(limiter.try_acquire(addr(2)).is_some());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_check_then_record() {
        let (clock, _offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(60), clock);

        assert!(limiter.check(addr(3)));
        limiter.record(addr(3));
        assert!(!limiter.check(addr(3)));
    }

    #[test]
    fn test_disabled_never_blocks() {
        let (clock, _offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(
            &RateLimitConfig {
                enabled: false,
                window_secs: 120,
            },
            clock,
        );

        let a = limiter.try_acquire(addr(1)).unwrap();
        let b = limiter.try_acquire(addr(1)).unwrap();
        assert_ne!(a, b);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let (clock, offset) = MockClock::new();
        let limiter = RateLimiter::with_clock(&config(10), clock);

        limiter.record(addr(1));
        MockClock::advance(&offset, Duration::from_secs(5));
        limiter.record(addr(2));
        MockClock::advance(&offset, Duration::from_secs(6));
        limiter.purge_expired();

        assert!(limiter.entry(addr(1)).is_none());
        assert!(limiter.entry(addr(2)).is_some());
    }
}
