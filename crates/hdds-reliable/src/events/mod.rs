// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed events: heartbeat, nack-response, nack-suppression, initial
//! heartbeat and heartbeat-response timers.
//!
//! # Architecture
//!
//! ```text
//!   TimedEvent::restart_timer()           EventService thread
//!   ┌──────────────────────────┐          ┌─────────────────────────────┐
//!   │ lock scheduler           │          │ wait_until(next deadline)   │
//!   │ armed = true             │  notify  │ pop due entry               │
//!   │ push (deadline, id, gen) │ ───────► │ unlock, run callback        │
//!   └──────────────────────────┘          │ relock, re-arm if `true`    │
//!                                         └─────────────────────────────┘
//! ```
//!
//! Every event carries a generation counter. `cancel_timer` bumps it, so a
//! queued firing from before the cancel is discarded, and a callback that
//! returns `true` after being cancelled mid-flight is not re-armed.
//! Callbacks run without the scheduler lock held; they may take endpoint
//! locks and restart or cancel any event, including their own.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Callback of a timed event. Returning `true` re-arms it for one more interval.
pub type EventCallback = Arc<dyn Fn() -> bool + Send + Sync>;

struct EventSlot {
    callback: EventCallback,
    interval: Duration,
    generation: u64,
    armed: bool,
}

#[derive(Default)]
struct Scheduler {
    slots: HashMap<u64, EventSlot>,
    queue: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    next_id: u64,
    shutdown: bool,
}

impl Scheduler {
    fn arm(&mut self, id: u64, deadline: Instant) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        slot.armed = true;
        self.queue.push(Reverse((deadline, id, slot.generation)));
        true
    }
}

struct Shared {
    scheduler: Mutex<Scheduler>,
    wakeup: Condvar,
    fired: AtomicU64,
}

/// Single-threaded scheduler running every [`TimedEvent`] created on it.
pub struct EventService {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventService {
    /// Start the scheduler thread.
    pub fn new() -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            scheduler: Mutex::new(Scheduler::default()),
            wakeup: Condvar::new(),
            fired: AtomicU64::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("hdds-reliable-events".to_string())
            .spawn(move || run(&worker_shared))
            .map_err(|e| {
                log::error!("[EVENTS] failed to spawn event thread: {}", e);
                Error::IoError(e)
            })?;
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Number of events currently armed.
    pub fn armed_count(&self) -> usize {
        self.shared
            .scheduler
            .lock()
            .slots
            .values()
            .filter(|s| s.armed)
            .count()
    }

    /// Number of callbacks executed so far.
    pub fn fired_count(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }

    /// Stop the worker thread; pending events never fire afterwards.
    pub fn shutdown(&self) {
        {
            let mut sched = self.shared.scheduler.lock();
            sched.shutdown = true;
            sched.queue.clear();
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EventService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    let mut sched = shared.scheduler.lock();
    loop {
        if sched.shutdown {
            return;
        }
        let Some(&Reverse((deadline, id, generation))) = sched.queue.peek() else {
            shared.wakeup.wait(&mut sched);
            continue;
        };
        let live = sched
            .slots
            .get(&id)
            .is_some_and(|s| s.armed && s.generation == generation);
        if !live {
            sched.queue.pop();
            continue;
        }
        if deadline > Instant::now() {
            shared.wakeup.wait_until(&mut sched, deadline);
            continue;
        }
        sched.queue.pop();
        let callback = match sched.slots.get_mut(&id) {
            Some(slot) => {
                slot.armed = false;
                Arc::clone(&slot.callback)
            }
            None => continue,
        };

        let rearm = MutexGuard::unlocked(&mut sched, || {
            shared.fired.fetch_add(1, Ordering::Relaxed);
            callback()
        });

        if rearm {
            let next = sched.slots.get(&id).and_then(|slot| {
                (slot.generation == generation && !slot.armed)
                    .then(|| Instant::now() + slot.interval)
            });
            if let Some(next) = next {
                sched.arm(id, next);
            }
        }
    }
}

/// Handle to one restartable timer. Dropping it unregisters the event.
pub struct TimedEvent {
    id: u64,
    shared: Arc<Shared>,
}

impl TimedEvent {
    pub fn new(
        service: &EventService,
        interval: Duration,
        callback: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        let mut sched = service.shared.scheduler.lock();
        let id = sched.next_id;
        sched.next_id += 1;
        sched.slots.insert(
            id,
            EventSlot {
                callback: Arc::new(callback),
                interval,
                generation: 0,
                armed: false,
            },
        );
        Self {
            id,
            shared: Arc::clone(&service.shared),
        }
    }

    /// Arm the timer for one interval from now. No-op while already armed.
    pub fn restart_timer(&self) {
        let mut sched = self.shared.scheduler.lock();
        if sched.shutdown {
            return;
        }
        let Some(slot) = sched.slots.get(&self.id) else {
            return;
        };
        if slot.armed {
            return;
        }
        let deadline = Instant::now() + slot.interval;
        sched.arm(self.id, deadline);
        drop(sched);
        self.shared.wakeup.notify_all();
    }

    /// Disarm the timer; a firing already queued is discarded.
    pub fn cancel_timer(&self) {
        let mut sched = self.shared.scheduler.lock();
        if let Some(slot) = sched.slots.get_mut(&self.id) {
            slot.generation += 1;
            slot.armed = false;
        }
    }

    /// Change the interval used by the next arm (does not move a pending deadline).
    pub fn update_interval(&self, interval: Duration) {
        if let Some(slot) = self.shared.scheduler.lock().slots.get_mut(&self.id) {
            slot.interval = interval;
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared
            .scheduler
            .lock()
            .slots
            .get(&self.id)
            .map(|s| s.interval)
            .unwrap_or_default()
    }

    pub fn is_armed(&self) -> bool {
        self.shared
            .scheduler
            .lock()
            .slots
            .get(&self.id)
            .is_some_and(|s| s.armed)
    }
}

impl Drop for TimedEvent {
    fn drop(&mut self) {
        self.shared.scheduler.lock().slots.remove(&self.id);
    }
}

impl std::fmt::Debug for TimedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedEvent").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_one_shot_fires_once() {
        let service = EventService::new().expect("event thread");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let event = TimedEvent::new(&service, Duration::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
            false
        });
        event.restart_timer();
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!event.is_armed());
    }

    #[test]
    fn test_periodic_rearms_until_false() {
        let service = EventService::new().expect("event thread");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let event = TimedEvent::new(&service, Duration::from_millis(2), move || {
            h.fetch_add(1, Ordering::SeqCst) < 2
        });
        event.restart_timer();
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 3));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let service = EventService::new().expect("event thread");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let event = TimedEvent::new(&service, Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
            false
        });
        event.restart_timer();
        assert!(event.is_armed());
        event.cancel_timer();
        assert!(!event.is_armed());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_while_armed_is_noop() {
        let service = EventService::new().expect("event thread");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let event = TimedEvent::new(&service, Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
            false
        });
        for _ in 0..5 {
            event.restart_timer();
        }
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_event_never_fires() {
        let service = EventService::new().expect("event thread");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let event = TimedEvent::new(&service, Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
            false
        });
        event.restart_timer();
        drop(event);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(service.armed_count(), 0);
    }

    #[test]
    fn test_update_interval() {
        let service = EventService::new().expect("event thread");
        let event = TimedEvent::new(&service, Duration::from_secs(1), || false);
        event.update_interval(Duration::from_millis(3));
        assert_eq!(event.interval(), Duration::from_millis(3));
    }

    #[test]
    fn test_spawn_failure_surfaces_as_io_error() {
        let spawn = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left");
        let err = Error::IoError(spawn);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("no threads left"));
        assert!(EventService::new().is_ok());
    }
}
