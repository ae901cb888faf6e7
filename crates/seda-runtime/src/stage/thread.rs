//! Stage thread state and the dispatch loop
//!
//! Each stage thread owns one handler and loops:
//!
//! ```text
//!   ┌─► pop (high, then normal or shared queue) ── event ──► handle_event
//!   │        │ every batch_size events: check timers
//!   │      empty
//!   │        ├─► check timers          (timer mode)
//!   │        ├─► handle_idle           (idle mode)
//!   │        └─► bounded wait on the thread's signal
//!   └────────────────┘
//! ```
//!
//! The idle and timer branches are const generic parameters, so each of the
//! four combinations compiles to its own loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use seda_core::clock::Clock;
use seda_core::error::{Result, SedaError};
use seda_core::event::RawEvent;
use seda_core::queue::{DoubleBufferQueue, EventQueue, MpmcQueue};
use seda_core::timer::{LruTimerQueue, TimerHandle, TimerQueue};
use seda_core::log_debug;

use super::context::StageContext;
use super::handler::StageHandler;
use super::lock;
use super::stats::ThreadStats;
use crate::config::StageConfig;

/// Producer-to-consumer wakeup with 0→1 signaling.
///
/// Producers bump `pending` after each push and only the push that finds it
/// at zero takes the lock and signals. The consumer swaps `pending` back to
/// zero right before its last emptiness check, then waits.
pub(crate) struct Signal {
    pending: AtomicUsize,
    flag: Mutex<bool>,
    cond: Condvar,
    enabled: bool,
}

impl Signal {
    pub fn new(enabled: bool) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            flag: Mutex::new(false),
            cond: Condvar::new(),
            enabled,
        }
    }

    /// Called after a successful push. Returns whether a signal was sent.
    pub fn notify(&self) -> bool {
        if self.pending.fetch_add(1, Ordering::AcqRel) != 0 || !self.enabled {
            return false;
        }
        *lock(&self.flag) = true;
        self.cond.notify_one();
        true
    }

    /// Wake every waiter regardless of `pending` (close, timer changes).
    pub fn wake_all(&self) {
        *lock(&self.flag) = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.pending.swap(0, Ordering::AcqRel);
    }

    /// Wait up to `timeout`. Returns `true` if woken by a signal.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut guard = lock(&self.flag);
        if !*guard {
            guard = match self.cond.wait_timeout(guard, timeout) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        let signaled = *guard;
        *guard = false;
        signaled
    }
}

/// Timer queues of one stage thread.
pub(crate) struct ThreadTimers {
    pub queue: TimerQueue<u64>,
    pub lru: Vec<LruTimerQueue<u64>>,
}

impl ThreadTimers {
    fn new(config: &StageConfig) -> Result<Self> {
        let lru = config
            .lru_slots
            .iter()
            .map(|slot| LruTimerQueue::new(slot.capacity, slot.interval_ms))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            queue: TimerQueue::new(config.timer_capacity)?,
            lru,
        })
    }

    pub fn set(&mut self, interval_ms: u64, param: u64, cyclic: bool, now: u64) -> Result<TimerHandle> {
        self.queue.set_timer(interval_ms, param, cyclic, now)
    }

    pub fn lru_mut(&mut self, slot: usize) -> Result<&mut LruTimerQueue<u64>> {
        self.lru
            .get_mut(slot)
            .ok_or(SedaError::InvalidArgument("no such lru timer slot"))
    }

    fn next_expire_time(&self) -> Option<u64> {
        self.lru
            .iter()
            .filter_map(|q| q.next_expire_time())
            .chain(self.queue.next_expire_time())
            .min()
    }
}

/// Queues, signal, timers and counters of one stage thread.
pub(crate) struct ThreadSlot {
    /// Absent when all threads share one queue
    pub normal: Option<DoubleBufferQueue>,
    pub high: Option<DoubleBufferQueue>,
    pub signal: Signal,
    pub timers: Option<Mutex<ThreadTimers>>,
    pub stats: ThreadStats,
}

/// Everything the stage threads and the `Stage` front end share.
pub(crate) struct StageShared {
    pub name: String,
    pub stage_type: u32,
    pub threads: Vec<ThreadSlot>,
    pub shared_queue: Option<MpmcQueue>,
    pub shared_signal: Signal,
    pub closing: AtomicBool,
    pub clock: Arc<Clock>,
    pub timedwait: Duration,
    pub batch_size: usize,
}

impl StageShared {
    pub fn new(config: &StageConfig, clock: Arc<Clock>) -> Result<Self> {
        let mut threads = Vec::with_capacity(config.thread_count);
        for _ in 0..config.thread_count {
            let normal = if config.shared_queue_enabled {
                None
            } else {
                Some(DoubleBufferQueue::new(
                    config.queue_capacity,
                    config.event_record_size,
                )?)
            };
            let high = if config.priority_enabled {
                Some(DoubleBufferQueue::new(
                    config.queue_capacity,
                    config.event_record_size,
                )?)
            } else {
                None
            };
            let timers = if config.timer_enabled {
                Some(Mutex::new(ThreadTimers::new(config)?))
            } else {
                None
            };
            threads.push(ThreadSlot {
                normal,
                high,
                signal: Signal::new(config.timedwait_signal_enabled),
                timers,
                stats: ThreadStats::default(),
            });
        }

        let shared_queue = if config.shared_queue_enabled {
            Some(MpmcQueue::new(
                config.queue_capacity,
                config.event_record_size,
            )?)
        } else {
            None
        };

        Ok(Self {
            name: config.name.clone(),
            stage_type: config.stage_type,
            threads,
            shared_queue,
            shared_signal: Signal::new(config.timedwait_signal_enabled),
            closing: AtomicBool::new(false),
            clock,
            timedwait: config.timedwait_interval,
            batch_size: config.batch_size,
        })
    }

    /// The signal a consumer of thread `index`'s queue waits on.
    #[inline]
    pub fn signal(&self, index: usize) -> &Signal {
        match self.shared_queue {
            Some(_) => &self.shared_signal,
            None => &self.threads[index].signal,
        }
    }

    pub fn slot(&self, index: usize) -> Result<&ThreadSlot> {
        self.threads
            .get(index)
            .ok_or(SedaError::InvalidArgument("stage thread index out of range"))
    }

    pub fn lock_timers(&self, index: usize) -> Result<MutexGuard<'_, ThreadTimers>> {
        let timers = self
            .slot(index)?
            .timers
            .as_ref()
            .ok_or(SedaError::InvalidArgument("timers are disabled for this stage"))?;
        Ok(lock(timers))
    }

    /// Records waiting for thread `index` (shared queue counted for all).
    pub fn pending(&self, index: usize) -> usize {
        let slot = &self.threads[index];
        let own = slot.normal.as_ref().map_or(0, |q| q.len())
            + slot.high.as_ref().map_or(0, |q| q.len());
        own + self.shared_queue.as_ref().map_or(0, |q| q.len())
    }
}

enum Step {
    Handled,
    Quit,
    Empty,
}

enum Fired {
    Timer(u64),
    Lru(usize, u64),
}

/// The thread-owned half: the handler and its scratch space.
pub(crate) struct Worker<H> {
    handler: H,
    shared: Arc<StageShared>,
    index: usize,
    fired: Vec<Fired>,
}

impl<H: StageHandler> Worker<H> {
    pub fn new(handler: H, shared: Arc<StageShared>, index: usize) -> Self {
        Self {
            handler,
            shared,
            index,
            fired: Vec::new(),
        }
    }

    pub fn run(mut self, idle: bool, timer: bool) {
        {
            let mut ctx = StageContext::new(&self.shared, self.index);
            self.handler.handle_open(&mut ctx);
        }
        match (idle, timer) {
            (false, false) => self.dispatch_loop::<false, false>(),
            (false, true) => self.dispatch_loop::<false, true>(),
            (true, false) => self.dispatch_loop::<true, false>(),
            (true, true) => self.dispatch_loop::<true, true>(),
        }
        let mut ctx = StageContext::new(&self.shared, self.index);
        self.handler.handle_close(&mut ctx);
        log_debug!(
            "stage {} thread {} exiting: {:?}",
            self.shared.name,
            self.index,
            self.shared.threads[self.index].stats.snapshot()
        );
    }

    fn dispatch_loop<const IDLE: bool, const TIMER: bool>(&mut self) {
        let batch = self.shared.batch_size;
        let mut since_check = 0usize;
        loop {
            match self.pop_one() {
                Step::Handled => {
                    since_check += 1;
                    if TIMER && since_check >= batch {
                        self.check_timers();
                        since_check = 0;
                    }
                    continue;
                }
                Step::Quit => break,
                Step::Empty => {}
            }

            if TIMER {
                self.check_timers();
                since_check = 0;
            }
            if IDLE {
                self.idle();
            }
            if self.shared.closing.load(Ordering::Acquire) {
                break;
            }

            let signal = self.shared.signal(self.index);
            signal.reset();
            if self.shared.pending(self.index) > 0 {
                continue;
            }
            self.wait::<TIMER>();
        }
    }

    /// Pop one record, high priority first.
    fn pop_one(&mut self) -> Step {
        let Worker {
            handler,
            shared,
            index,
            ..
        } = self;
        let shared: &StageShared = shared;
        let index = *index;
        let slot = &shared.threads[index];
        let mut ctx = StageContext::new(shared, index);
        let mut quit = false;

        let popped = {
            let mut dispatch = |ev: RawEvent<'_>| {
                if ev.is_quit() {
                    quit = true;
                } else {
                    handler.handle_event(ev, &mut ctx);
                }
            };
            let high = match &slot.high {
                Some(q) => q.pop_with(&mut dispatch),
                None => false,
            };
            high || match (&shared.shared_queue, &slot.normal) {
                (Some(q), _) => q.pop_with(&mut dispatch),
                (None, Some(q)) => q.pop_with(&mut dispatch),
                (None, None) => false,
            }
        };

        if !popped {
            return Step::Empty;
        }
        if quit {
            return Step::Quit;
        }
        slot.stats.record_event();
        Step::Handled
    }

    fn check_timers(&mut self) {
        let Worker {
            handler,
            shared,
            index,
            fired,
        } = self;
        let shared: &StageShared = shared;
        let index = *index;
        let slot = &shared.threads[index];
        let Some(timers) = &slot.timers else {
            return;
        };

        let now = shared.clock.now_ms();
        {
            let mut timers = lock(timers);
            timers
                .queue
                .expire(now, |_, param| fired.push(Fired::Timer(*param)));
            for (i, lru) in timers.lru.iter_mut().enumerate() {
                lru.expire(now, |_, param| fired.push(Fired::Lru(i, *param)));
            }
        }
        if fired.is_empty() {
            return;
        }

        slot.stats.record_timers(fired.len());
        let mut ctx = StageContext::new(shared, index);
        for f in fired.drain(..) {
            match f {
                Fired::Timer(param) => handler.handle_timeout(param, &mut ctx),
                Fired::Lru(i, param) => handler.handle_lru_timeout(i, param, &mut ctx),
            }
        }
    }

    fn idle(&mut self) {
        let mut ctx = StageContext::new(&self.shared, self.index);
        self.handler.handle_idle(&mut ctx);
        self.shared.threads[self.index].stats.record_idle();
    }

    /// Bounded wait; shortened to the next timer expiry in timer mode.
    fn wait<const TIMER: bool>(&mut self) {
        let shared = &*self.shared;
        let slot = &shared.threads[self.index];
        let mut timeout = shared.timedwait;
        if TIMER {
            if let Some(timers) = &slot.timers {
                if let Some(at) = lock(timers).next_expire_time() {
                    let now = shared.clock.now_ms();
                    timeout = timeout.min(Duration::from_millis(at.saturating_sub(now)));
                }
            }
        }
        if timeout.is_zero() {
            return;
        }
        let signaled = shared.signal(self.index).wait(timeout);
        slot.stats.record_wait(signaled);
    }
}
