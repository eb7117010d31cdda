use api::{DeviceRole, SmoothedSample};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Queues {
    slots: [VecDeque<(u64, SmoothedSample)>; 3],
    superseded: [u64; 3],
    next_ticket: u64,
    closed: bool,
}

/// Bounded hand-off between device sessions and the output thread.
///
/// Each role has its own small queue; when it is full the oldest sample is
/// superseded, so a slow consumer sees fresh data instead of a backlog.
/// Pops return samples in arrival order across roles, and a role's own
/// order is never changed.
pub struct Handoff {
    queues: Mutex<Queues>,
    ready: Condvar,
    depth: usize,
}

impl Handoff {
    pub fn new(depth: usize) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            ready: Condvar::new(),
            depth: depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when an older sample had to be dropped to make room.
    pub fn push(&self, sample: SmoothedSample) -> bool {
        let slot = sample.role.index();
        let mut q = self.lock();
        if q.closed {
            return true;
        }
        let mut kept_all = true;
        while q.slots[slot].len() >= self.depth {
            q.slots[slot].pop_front();
            q.superseded[slot] += 1;
            kept_all = false;
        }
        let ticket = q.next_ticket;
        q.next_ticket += 1;
        q.slots[slot].push_back((ticket, sample));
        drop(q);
        self.ready.notify_one();
        kept_all
    }

    fn take_earliest(q: &mut Queues) -> Option<SmoothedSample> {
        let slot = q
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.front().map(|(ticket, _)| (i, *ticket)))
            .min_by_key(|(_, ticket)| *ticket)
            .map(|(i, _)| i)?;
        q.slots[slot].pop_front().map(|(_, sample)| sample)
    }

    pub fn try_pop(&self) -> Option<SmoothedSample> {
        Self::take_earliest(&mut self.lock())
    }

    /// Waits up to `timeout` for a sample. `None` on timeout or once closed
    /// and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<SmoothedSample> {
        let deadline = Instant::now() + timeout;
        let mut q = self.lock();
        loop {
            if let Some(sample) = Self::take_earliest(&mut q) {
                return Some(sample);
            }
            if q.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            q = guard;
        }
    }

    pub fn len(&self, role: DeviceRole) -> usize {
        self.lock().slots[role.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.iter().all(|s| s.is_empty())
    }

    /// Samples of `role` dropped unread so far.
    pub fn superseded(&self, role: DeviceRole) -> u64 {
        self.lock().superseded[role.index()]
    }

    /// Drops whatever `role` still has queued.
    pub fn clear(&self, role: DeviceRole) {
        self.lock().slots[role.index()].clear();
    }

    /// Wakes every waiter; pushes are ignored from now on.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
