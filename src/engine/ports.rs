// ABOUTME: Host port allocation from a bounded range.
// ABOUTME: Excludes engine-live ports, store-reserved ports, tried ports and in-flight claims.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Pick the first port in `range` at or after `cursor` (wrapping) that is not
/// in `excluded`.
pub fn pick_port(range: &RangeInclusive<u16>, cursor: u16, excluded: &HashSet<u16>) -> Option<u16> {
    let (start, end) = (*range.start(), *range.end());
    if start > end {
        return None;
    }
    let cursor = if range.contains(&cursor) { cursor } else { start };
    (cursor..=end)
        .chain(start..cursor)
        .find(|port| !excluded.contains(port))
}

/// Hands out host ports and remembers which ones are claimed by starts in flight.
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    check_host_bind: bool,
    state: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
    cursor: u16,
    claimed: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>, check_host_bind: bool) -> Self {
        let cursor = *range.start();
        Self {
            range,
            check_host_bind,
            state: Mutex::new(AllocatorState {
                cursor,
                claimed: HashSet::new(),
            }),
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Claim a port that is in none of the given sets.
    ///
    /// The claim lasts until [`release`](Self::release); concurrent callers
    /// never receive the same port while it is held.
    pub fn claim(&self, live: &HashSet<u16>, reserved: &HashSet<u16>, tried: &HashSet<u16>) -> Option<u16> {
        let mut state = self.state.lock();
        let mut excluded: HashSet<u16> = live
            .iter()
            .chain(reserved)
            .chain(tried)
            .chain(&state.claimed)
            .copied()
            .collect();

        loop {
            let port = pick_port(&self.range, state.cursor, &excluded)?;
            if self.check_host_bind && !host_port_is_free(port) {
                excluded.insert(port);
                continue;
            }
            state.claimed.insert(port);
            state.cursor = if port == *self.range.end() {
                *self.range.start()
            } else {
                port + 1
            };
            return Some(port);
        }
    }

    pub fn release(&self, port: u16) {
        self.state.lock().claimed.remove(&port);
    }
}

fn host_port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}
