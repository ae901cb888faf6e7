//! # SEDA stages
//!
//! A stage is a named pool of OS threads, each running its own
//! [`StageHandler`] over its own input queue:
//!
//! ```text
//!   push_event ──round robin──► [thread 0: high? + normal DoubleBuffer] ──► handler 0
//!                          └──► [thread 1: high? + normal DoubleBuffer] ──► handler 1
//!
//!   shared_queue_enabled:  push_event ──► [one MpmcQueue] ──► every thread
//! ```
//!
//! Producers never block: a full queue returns `QueueFull`. A thread with no
//! work waits on a condition variable for at most `timedwait_interval`, and
//! producers signal it only when its pending count goes from zero to one.
//!
//! `close()` queues a quit event behind everything already pushed and joins
//! the threads; each handler then sees `handle_close` once.

mod context;
mod handler;
mod stats;
mod thread;

pub use context::StageContext;
pub use handler::StageHandler;
pub use stats::StageStats;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use seda_core::clock::RuntimeContext;
use seda_core::error::{Result, SedaError};
use seda_core::event::{EventRecord, QuitEvent};
use seda_core::queue::EventQueue;
use seda_core::timer::TimerHandle;
use seda_core::{log_error, log_info, log_warn};

use crate::config::StageConfig;
use thread::{StageShared, Worker};

/// Lock ignoring poison: stage state stays usable after a handler panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue selection for [`Stage::push_raw_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Drained before any normal event of the same thread
    High,
    #[default]
    Normal,
}

/// A running stage.
///
/// `Stage` is `Sync`: share it (e.g. in an `Arc`) and push from any thread.
pub struct Stage {
    config: StageConfig,
    shared: Arc<StageShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl Stage {
    /// Validate `config`, build every queue and spawn the threads.
    ///
    /// `factory(i)` builds the handler of thread `i` on the calling thread.
    pub fn open<H, F>(config: StageConfig, runtime: &RuntimeContext, factory: F) -> Result<Self>
    where
        H: StageHandler,
        F: Fn(usize) -> H,
    {
        config.validate()?;
        let shared = Arc::new(StageShared::new(&config, Arc::clone(&runtime.clock))?);

        let mut handles = Vec::with_capacity(config.thread_count);
        for index in 0..config.thread_count {
            let worker = Worker::new(factory(index), Arc::clone(&shared), index);
            let (idle, timer) = (config.idle_enabled, config.timer_enabled);
            let spawned = std::thread::Builder::new()
                .name(format!("stage-{}-{}", config.name, index))
                .spawn(move || worker.run(idle, timer));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log_error!("stage {}: spawning thread {} failed: {}", config.name, index, e);
                    shared.closing.store(true, Ordering::Release);
                    for i in 0..index {
                        shared.signal(i).wake_all();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SedaError::SpawnFailed);
                }
            }
        }

        log_info!(
            "stage {} opened: threads={} queue={}x{}B shared={} priority={} idle={} timer={}",
            config.name,
            config.thread_count,
            config.queue_capacity,
            config.slot_size(),
            config.shared_queue_enabled,
            config.priority_enabled,
            config.idle_enabled,
            config.timer_enabled
        );

        Ok(Self {
            config,
            shared,
            threads: Mutex::new(handles),
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stage_type(&self) -> u32 {
        self.config.stage_type
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn thread_count(&self) -> usize {
        self.config.thread_count
    }

    #[inline]
    pub fn now_us(&self) -> u64 {
        self.shared.clock.now_us()
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Push to the next thread in round-robin order (or the shared queue).
    pub fn push_raw(&self, bytes: &[u8]) -> Result<()> {
        self.push_raw_with(Priority::Normal, bytes)
    }

    pub fn push_event<E: EventRecord>(&self, event: &E) -> Result<()> {
        self.push_raw(event.as_bytes())
    }

    /// Round-robin push into the given priority queue. Without
    /// `priority_enabled`, `High` falls back to the normal queue.
    pub fn push_raw_with(&self, priority: Priority, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        if let Some(queue) = &self.shared.shared_queue {
            queue.push(bytes)?;
            self.shared.shared_signal.notify();
            return Ok(());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.config.thread_count;
        self.push_to(index, priority, bytes)
    }

    pub fn push_event_with<E: EventRecord>(&self, priority: Priority, event: &E) -> Result<()> {
        self.push_raw_with(priority, event.as_bytes())
    }

    /// Push to one specific thread. With a shared queue any thread may take
    /// the event.
    pub fn push_raw_to(&self, thread: usize, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.push_to(thread, Priority::Normal, bytes)
    }

    pub fn push_event_to<E: EventRecord>(&self, thread: usize, event: &E) -> Result<()> {
        self.push_raw_to(thread, event.as_bytes())
    }

    fn push_to(&self, index: usize, priority: Priority, bytes: &[u8]) -> Result<()> {
        let slot = self.shared.slot(index)?;
        let queue = match (priority, &slot.high, &slot.normal) {
            (Priority::High, Some(high), _) => high,
            (_, _, Some(normal)) => normal,
            _ => {
                return match &self.shared.shared_queue {
                    Some(queue) => {
                        queue.push(bytes)?;
                        self.shared.shared_signal.notify();
                        Ok(())
                    }
                    None => Err(SedaError::InvalidArgument("stage thread has no queue")),
                }
            }
        };
        queue.push(bytes)?;
        slot.signal.notify();
        Ok(())
    }

    /// Records queued for `thread` and not yet handled.
    pub fn pending(&self, thread: usize) -> Result<usize> {
        self.shared.slot(thread)?;
        Ok(self.shared.pending(thread))
    }

    pub fn stats(&self, thread: usize) -> Result<StageStats> {
        Ok(self.shared.slot(thread)?.stats.snapshot())
    }

    /// Counters of all threads summed.
    pub fn total_stats(&self) -> StageStats {
        let mut total = StageStats::default();
        for slot in &self.shared.threads {
            total += slot.stats.snapshot();
        }
        total
    }

    /// Arm a timer on `thread`; it fires into that thread's
    /// `handle_timeout(param)`.
    pub fn set_timer(&self, thread: usize, interval_ms: u64, cyclic: bool, param: u64) -> Result<TimerHandle> {
        let now = self.now_ms();
        let handle = self
            .shared
            .lock_timers(thread)?
            .set(interval_ms, param, cyclic, now)?;
        self.shared.signal(thread).wake_all();
        Ok(handle)
    }

    pub fn cancel_timer(&self, thread: usize, handle: TimerHandle) -> Result<u64> {
        self.shared.lock_timers(thread)?.queue.cancel_timer(handle)
    }

    pub fn update_timer(&self, thread: usize, handle: TimerHandle) -> Result<()> {
        let now = self.now_ms();
        self.shared
            .lock_timers(thread)?
            .queue
            .update_timer(handle, now)
    }

    /// Arm a timer in LRU slot `slot` of `thread`.
    pub fn set_lru_timer(&self, thread: usize, slot: usize, param: u64) -> Result<TimerHandle> {
        let now = self.now_ms();
        let handle = self
            .shared
            .lock_timers(thread)?
            .lru_mut(slot)?
            .set_timer(param, false, now)?;
        self.shared.signal(thread).wake_all();
        Ok(handle)
    }

    pub fn update_lru_timer(&self, thread: usize, slot: usize, handle: TimerHandle) -> Result<()> {
        let now = self.now_ms();
        self.shared
            .lock_timers(thread)?
            .lru_mut(slot)?
            .update_timer(handle, now)
    }

    pub fn cancel_lru_timer(&self, thread: usize, slot: usize, handle: TimerHandle) -> Result<u64> {
        self.shared
            .lock_timers(thread)?
            .lru_mut(slot)?
            .cancel_timer(handle)
    }

    /// Queue a quit event for every thread and join them. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let quit = QuitEvent::new(self.now_us());
        let mut undelivered = false;
        match &self.shared.shared_queue {
            Some(queue) => {
                for _ in 0..self.config.thread_count {
                    undelivered |= queue.push_event(&quit).is_err();
                }
            }
            None => {
                for slot in &self.shared.threads {
                    if let Some(normal) = &slot.normal {
                        undelivered |= normal.push_event(&quit).is_err();
                    }
                }
            }
        }
        if undelivered {
            log_warn!("stage {}: queue full at close, stopping on drain", self.config.name);
            self.shared.closing.store(true, Ordering::Release);
        }
        for i in 0..self.config.thread_count {
            self.shared.signal(i).wake_all();
        }

        let handles = std::mem::take(&mut *lock(&self.threads));
        for handle in handles {
            if handle.join().is_err() {
                log_error!("stage {}: a thread panicked", self.config.name);
            }
        }
        log_info!("stage {} closed: {:?}", self.config.name, self.total_stats());
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SedaError::NotOpened);
        }
        Ok(())
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LruSlotConfig;
    use seda_core::event::{EventHeader, RawEvent};
    use std::sync::atomic::AtomicU64;
    use std::thread;
    use std::time::{Duration, Instant};

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Job {
        header: EventHeader,
        n: u64,
    }

    unsafe impl EventRecord for Job {
        const TYPE_ID: u32 = 1;
    }

    fn job(n: u64) -> Job {
        Job {
            header: EventHeader::for_record::<Job>(0),
            n,
        }
    }

    const GATE: u64 = u64::MAX;

    #[derive(Default)]
    struct Shared {
        log: Mutex<Vec<(usize, u64)>>,
        timeouts: Mutex<Vec<(usize, u64)>>,
        lru: Mutex<Vec<(usize, u64)>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        idle: AtomicUsize,
        gate_entered: AtomicBool,
        gate_open: AtomicBool,
        sum: AtomicU64,
    }

    struct Recorder {
        index: usize,
        shared: Arc<Shared>,
        open_timer: Option<u64>,
    }

    impl StageHandler for Recorder {
        fn handle_open(&mut self, ctx: &mut StageContext<'_>) {
            assert_eq!(ctx.thread_index(), self.index);
            self.shared.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = self.open_timer {
                ctx.set_timer(ms, 100 + self.index as u64, false).unwrap();
            }
        }

        fn handle_event(&mut self, event: RawEvent<'_>, _ctx: &mut StageContext<'_>) {
            let Some(job) = event.decode::<Job>() else {
                return;
            };
            if job.n == GATE {
                self.shared.gate_entered.store(true, Ordering::SeqCst);
                while !self.shared.gate_open.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                return;
            }
            self.shared.sum.fetch_add(job.n, Ordering::SeqCst);
            self.shared.log.lock().unwrap().push((self.index, job.n));
        }

        fn handle_timeout(&mut self, param: u64, _ctx: &mut StageContext<'_>) {
            self.shared.timeouts.lock().unwrap().push((self.index, param));
        }

        fn handle_lru_timeout(&mut self, slot: usize, param: u64, _ctx: &mut StageContext<'_>) {
            self.shared.lru.lock().unwrap().push((slot, param));
        }

        fn handle_idle(&mut self, _ctx: &mut StageContext<'_>) {
            self.shared.idle.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_close(&mut self, _ctx: &mut StageContext<'_>) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open_stage(config: StageConfig, shared: &Arc<Shared>) -> Stage {
        let shared = Arc::clone(shared);
        Stage::open(config, &RuntimeContext::new(), move |index| Recorder {
            index,
            shared: Arc::clone(&shared),
            open_timer: None,
        })
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn config(name: &str, threads: usize) -> StageConfig {
        StageConfig::new(name)
            .thread_count(threads)
            .queue_capacity(256)
            .event_record_size(64)
            .timedwait_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_round_robin_keeps_per_thread_order() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("rr", 2), &shared);
        for n in 0..10 {
            stage.push_event(&job(n)).unwrap();
        }
        stage.close();

        let log = shared.log.lock().unwrap();
        assert_eq!(log.len(), 10);
        for t in 0..2 {
            let seen: Vec<u64> = log.iter().filter(|(i, _)| *i == t).map(|(_, n)| *n).collect();
            let expected: Vec<u64> = (0..10).filter(|n| (*n as usize) % 2 == t).collect();
            assert_eq!(seen, expected);
        }
        assert_eq!(stage.total_stats().events, 10);
    }

    #[test]
    fn test_close_is_idempotent() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("close", 3), &shared);
        assert!(wait_until(|| shared.opens.load(Ordering::SeqCst) == 3));

        stage.close();
        stage.close();
        assert!(stage.is_closed());
        assert_eq!(shared.closes.load(Ordering::SeqCst), 3);
        assert_eq!(stage.push_event(&job(1)), Err(SedaError::NotOpened));

        drop(stage);
        assert_eq!(shared.closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_push_to_specific_thread() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("to", 3), &shared);
        for n in 0..4 {
            stage.push_event_to(2, &job(n)).unwrap();
        }
        assert!(matches!(
            stage.push_event_to(3, &job(9)),
            Err(SedaError::InvalidArgument(_))
        ));
        stage.close();
        let log = shared.log.lock().unwrap();
        assert!(log.iter().all(|(i, _)| *i == 2));
        assert_eq!(log.len(), 4);
        assert_eq!(stage.stats(2).unwrap().events, 4);
    }

    #[test]
    fn test_queue_full_is_backpressure() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("full", 1).queue_capacity(4), &shared);

        stage.push_event(&job(GATE)).unwrap();
        assert!(wait_until(|| shared.gate_entered.load(Ordering::SeqCst)));

        let mut accepted = 0;
        let mut rejected = false;
        for n in 0..64 {
            match stage.push_event(&job(n)) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    assert_eq!(e, SedaError::QueueFull);
                    rejected = true;
                    break;
                }
            }
        }
        assert!(rejected);
        assert!(accepted <= 8);

        shared.gate_open.store(true, Ordering::SeqCst);
        stage.close();
        assert_eq!(shared.log.lock().unwrap().len(), accepted);
    }

    #[test]
    fn test_priority_drained_first() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("prio", 1).priority_enabled(true), &shared);

        stage.push_event(&job(GATE)).unwrap();
        assert!(wait_until(|| shared.gate_entered.load(Ordering::SeqCst)));

        stage.push_event(&job(1)).unwrap();
        stage.push_event(&job(2)).unwrap();
        stage.push_event_with(Priority::High, &job(100)).unwrap();
        shared.gate_open.store(true, Ordering::SeqCst);
        stage.close();

        let order: Vec<u64> = shared.log.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(order, vec![100, 1, 2]);
    }

    #[test]
    fn test_shared_queue_no_loss() {
        let shared = Arc::new(Shared::default());
        let stage = Arc::new(open_stage(
            config("shared", 3).shared_queue_enabled(true).queue_capacity(1024),
            &shared,
        ));

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let stage = Arc::clone(&stage);
                thread::spawn(move || {
                    for n in 1..=100u64 {
                        let v = p * 1000 + n;
                        while stage.push_event(&job(v)).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        stage.close();

        let expected: u64 = (0..3u64).map(|p| (1..=100u64).map(|n| p * 1000 + n).sum::<u64>()).sum();
        assert_eq!(shared.sum.load(Ordering::SeqCst), expected);
        assert_eq!(shared.log.lock().unwrap().len(), 300);
    }

    #[test]
    fn test_all_dispatch_modes() {
        for (idle, timer) in [(false, false), (false, true), (true, false), (true, true)] {
            let shared = Arc::new(Shared::default());
            let cfg = config("modes", 2).idle_enabled(idle).timer_enabled(timer);
            let stage = open_stage(cfg, &shared);
            for n in 0..50 {
                stage.push_event(&job(n)).unwrap();
            }
            stage.close();
            assert_eq!(shared.log.lock().unwrap().len(), 50, "idle={} timer={}", idle, timer);
            assert_eq!(shared.closes.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn test_idle_callbacks() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("idle", 1).idle_enabled(true), &shared);
        assert!(wait_until(|| shared.idle.load(Ordering::SeqCst) >= 3));
        stage.close();
        assert!(stage.stats(0).unwrap().idle_calls >= 3);
    }

    #[test]
    fn test_timers_from_handler_and_stage() {
        let shared = Arc::new(Shared::default());
        let s = Arc::clone(&shared);
        let stage = Stage::open(
            config("timers", 2).timer_enabled(true),
            &RuntimeContext::new(),
            move |index| Recorder {
                index,
                shared: Arc::clone(&s),
                open_timer: Some(10),
            },
        )
        .unwrap();

        stage.set_timer(1, 15, false, 7).unwrap();
        let cancelled = stage.set_timer(0, 10_000, false, 8).unwrap();
        assert_eq!(stage.cancel_timer(0, cancelled), Ok(8));

        assert!(wait_until(|| shared.timeouts.lock().unwrap().len() >= 3));
        stage.close();

        let mut fired = shared.timeouts.lock().unwrap().clone();
        fired.sort_unstable();
        assert_eq!(fired, vec![(0, 100), (1, 7), (1, 101)]);
        assert_eq!(stage.total_stats().timers_fired, 3);
    }

    #[test]
    fn test_lru_slot_timer() {
        let shared = Arc::new(Shared::default());
        let cfg = config("lru", 1)
            .timer_enabled(true)
            .lru_slot(LruSlotConfig::new(8, 20));
        let stage = open_stage(cfg, &shared);

        let a = stage.set_lru_timer(0, 0, 1).unwrap();
        stage.set_lru_timer(0, 0, 2).unwrap();
        stage.update_lru_timer(0, 0, a).unwrap();
        assert!(matches!(
            stage.set_lru_timer(0, 1, 3),
            Err(SedaError::InvalidArgument(_))
        ));

        assert!(wait_until(|| shared.lru.lock().unwrap().len() >= 2));
        stage.close();
        assert_eq!(*shared.lru.lock().unwrap(), vec![(0, 2), (0, 1)]);
    }

    #[test]
    fn test_timers_disabled() {
        let shared = Arc::new(Shared::default());
        let stage = open_stage(config("notimer", 1).timer_enabled(false), &shared);
        assert!(matches!(
            stage.set_timer(0, 10, false, 1),
            Err(SedaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_signal_wakes_long_wait() {
        let shared = Arc::new(Shared::default());
        let cfg = config("signal", 1).timedwait_interval(Duration::from_secs(5));
        let stage = open_stage(cfg, &shared);
        assert!(wait_until(|| shared.opens.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        stage.push_event(&job(5)).unwrap();
        assert!(wait_until(|| !shared.log.lock().unwrap().is_empty()));
        assert!(start.elapsed() < Duration::from_secs(1));
        stage.close();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = config("bad", 2)
            .shared_queue_enabled(true)
            .priority_enabled(true);
        let result = Stage::open(cfg, &RuntimeContext::new(), |index| Recorder {
            index,
            shared: Arc::new(Shared::default()),
            open_timer: None,
        });
        assert!(result.is_err());
    }
}
