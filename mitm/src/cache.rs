//! Tickets handed out by the login server, and where they lead.
use ::std::collections::HashMap;
use ::std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use ::std::time::Duration;

use ::tokio::time::{self, Instant, MissedTickBehavior};
use ::tokio_util::sync::CancellationToken;

/// Shared between the login proxy, which fills it, and the game proxy,
/// which drains it.
///
/// None of these operations can fail. A ticket that was never stored,
/// has already been used, or has outlived the TTL is simply absent.
pub trait TicketCache: Send + Sync {
    /// Remember that `ticket` leads to `addr`, replacing any earlier entry.
    fn put(&self, ticket: String, addr: String);
    /// Take the address for `ticket` out of the cache.
    ///
    /// Tickets are single use: a second `get` for the same ticket
    /// returns `None`, so a captured ticket can't be replayed through the proxy.
    fn get(&self, ticket: &str) -> Option<String>;
    /// Drop every entry that is expired at `now`, returning how many went.
    fn sweep(&self, now: Instant) -> usize;
}

#[derive(Debug)]
struct Entry {
    addr: String,
    created_at: Instant,
}

/// In-process [`TicketCache`]. Nothing survives a restart.
#[derive(Debug)]
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}
impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // every critical section is a single map call, so a panic can't leave it half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created_at) >= self.ttl
    }
}
impl TicketCache for MemoryCache {
    fn put(&self, ticket: String, addr: String) {
        let entry = Entry { addr, created_at: Instant::now() };
        self.entries().insert(ticket, entry);
    }

    fn get(&self, ticket: &str) -> Option<String> {
        let entry = self.entries().remove(ticket)?;
        if self.expired(&entry, Instant::now()) {
            return None;
        }
        Some(entry.addr)
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !self.expired(entry, now));
        before - entries.len()
    }
}

/// Sweep `cache` every `every` until `cancel` fires.
///
/// # Panics
/// If `every` is zero.
pub async fn sweep_loop(cache: Arc<dyn TicketCache>, every: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ::tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            now = ticker.tick() => {
                let evicted = cache.sweep(now);
                if evicted > 0 {
                    ::tracing::debug!(evicted, "cache: swept expired tickets");
                }
            },
        }
    }
    ::tracing::debug!("cache: sweep stopped");
}
