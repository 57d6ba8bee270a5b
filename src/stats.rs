//! Process-wide diagnostic counters for open client and upstream
//! connections. Plain atomics: no lock, no cross-pair coordination, just
//! something a health endpoint or a log line can read.

use std::sync::atomic::{AtomicUsize, Ordering};

static OPEN_CLIENTS: AtomicUsize = AtomicUsize::new(0);
static OPEN_UPSTREAMS: AtomicUsize = AtomicUsize::new(0);

pub fn open_clients() -> usize {
    OPEN_CLIENTS.load(Ordering::Relaxed)
}

pub fn open_upstreams() -> usize {
    OPEN_UPSTREAMS.load(Ordering::Relaxed)
}

/// Bumps `open_clients` on creation and decrements it on drop, regardless
/// of which exit path a pair's task takes (normal return, error return, or
/// panic unwind). This is what makes the counter bookkeeping impossible to
/// skip on teardown.
pub struct ClientGuard;

impl ClientGuard {
    pub fn new() -> Self {
        OPEN_CLIENTS.fetch_add(1, Ordering::Relaxed);
        ClientGuard
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        OPEN_CLIENTS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Same idea as [`ClientGuard`], scoped to the lifetime of a connected
/// `Upstream` endpoint.
pub struct UpstreamGuard;

impl UpstreamGuard {
    pub fn new() -> Self {
        OPEN_UPSTREAMS.fetch_add(1, Ordering::Relaxed);
        UpstreamGuard
    }
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        OPEN_UPSTREAMS.fetch_sub(1, Ordering::Relaxed);
    }
}
