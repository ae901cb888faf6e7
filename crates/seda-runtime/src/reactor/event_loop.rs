//! The event loop: handler table, dispatch round and cross-thread control

use std::collections::HashMap;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

use seda_core::clock::{Clock, RuntimeContext};
use seda_core::error::{Result, SedaError};
use seda_core::event::{EventRecord, WAKE_EVENT_TYPE};
use seda_core::queue::{EventQueue, MpscQueue};
use seda_core::timer::{TimerHandle, TimerQueue};
use seda_core::{log_debug, log_info, log_trace, log_warn};

use super::context::{Deferred, LoopContext, LoopEventHandler, NoopLoopHandler, TimerTarget};
use super::handler::{HandlerState, IoHandler, NewHandler, Token, WAKER_TOKEN};
use super::interest::{Interest, PollEvent};
use super::poller::{DefaultPoller, Poller};
use super::source::EventSource;
use super::waker::Waker;
use crate::config::LoopConfig;

/// Requests from other threads, applied by the loop thread.
enum Command {
    Add(NewHandler),
    Delete(Token),
    Interest(Token, Interest),
}

/// State reachable from any thread.
pub(crate) struct LoopShared {
    waker: Waker,
    inject: MpscQueue,
    commands: ArrayQueue<Command>,
    stopped: AtomicBool,
    clock: Arc<Clock>,
}

/// Cloneable, `Send + Sync` remote control for one [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Unblock the loop's poll. Returns `false` if a wake was already pending.
    pub fn wakeup(&self) -> Result<bool> {
        self.shared.waker.wake()
    }

    /// Queue a raw event record for the loop's [`LoopEventHandler`].
    ///
    /// Fails with `QueueFull` when the inject queue is full.
    pub fn push_raw(&self, bytes: &[u8]) -> Result<()> {
        self.shared.inject.push(bytes)?;
        self.wakeup().map(|_| ())
    }

    pub fn push_event<E: EventRecord>(&self, event: &E) -> Result<()> {
        self.push_raw(event.as_bytes())
    }

    /// Register a handler on the loop thread. On failure the handler goes
    /// back to its source.
    pub fn add_handler(&self, handler: NewHandler) -> Result<()> {
        match self.shared.commands.push(Command::Add(handler)) {
            Ok(()) => self.wakeup().map(|_| ()),
            Err(cmd) => {
                if let Command::Add(handler) = cmd {
                    handler.discard();
                }
                Err(SedaError::QueueFull)
            }
        }
    }

    pub fn delete_handler(&self, token: Token) -> Result<()> {
        self.send(Command::Delete(token))
    }

    pub fn set_interest(&self, token: Token, interest: Interest) -> Result<()> {
        self.send(Command::Interest(token, interest))
    }

    /// Ask `run()` to return after the current round.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.wakeup();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    /// Injected events not yet handled.
    pub fn pending_events(&self) -> usize {
        self.shared.inject.len()
    }

    /// Wake writes actually issued to the poller.
    pub fn wake_notifications(&self) -> u64 {
        self.shared.waker.notifications()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.shared
            .commands
            .push(cmd)
            .map_err(|_| SedaError::QueueFull)?;
        self.wakeup().map(|_| ())
    }
}

/// Counters updated by the loop thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub io_events: u64,
    pub wakeups: u64,
    pub injected: u64,
    pub timers_fired: u64,
    pub opened: u64,
    pub closed: u64,
}

struct Entry {
    handler: Box<dyn IoHandler>,
    fd: RawFd,
    state: HandlerState,
    interest: Interest,
    source: Option<Arc<dyn EventSource>>,
    /// Timers aimed at this handler; cancelled when it closes
    timers: Vec<TimerHandle>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

fn lookup(slots: &mut [Slot], token: Token) -> Option<&mut Entry> {
    match slots.get_mut(token.index() as usize) {
        Some(slot) if slot.generation == token.generation() => slot.entry.as_mut(),
        _ => None,
    }
}

fn attach_timer(timers: &TimerQueue<TimerTarget>, entry: &mut Entry, handle: TimerHandle) {
    entry.timers.retain(|h| timers.is_pending(*h));
    entry.timers.push(handle);
}

fn reclaim(handler: Box<dyn IoHandler>, source: Option<Arc<dyn EventSource>>) {
    match source {
        Some(source) => source.reclaim(handler),
        None => drop(handler),
    }
}

/// Pending error on a socket, or the errno of the failed query.
fn socket_error(fd: RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return match SedaError::last_os_error() {
            SedaError::Os(errno) => errno,
            _ => libc::EINVAL,
        };
    }
    err
}

/// Single-threaded reactor over poller backend `P`.
///
/// One thread owns the loop and calls [`run_once`](Self::run_once) or
/// [`run`](Self::run); every other thread talks to it through a
/// [`LoopHandle`].
///
/// Each round: poll (bounded by the caller's timeout, `max_timeout` and the
/// next timer) → dispatch ready handlers → apply remote commands → drain
/// injected events → expire timers.
pub struct EventLoop<P: Poller = DefaultPoller> {
    config: LoopConfig,
    clock: Arc<Clock>,
    poller: P,
    slots: Vec<Slot>,
    free: Vec<u32>,
    count: usize,
    fds: HashMap<RawFd, Token>,
    timers: TimerQueue<TimerTarget>,
    deferred: Deferred,
    events: Vec<PollEvent>,
    fired: Vec<(TimerHandle, TimerTarget)>,
    handle: LoopHandle,
    loop_handler: Box<dyn LoopEventHandler>,
    stats: LoopStats,
}

impl<P: Poller> EventLoop<P> {
    /// Create the poller, waker and queues. Any failure here is fatal for
    /// this loop.
    pub fn open(config: LoopConfig, runtime: &RuntimeContext) -> Result<Self> {
        config.validate()?;

        let mut poller = P::new(config.max_handles + 1, config.edge_triggered())?;
        let waker = Waker::new()?;
        poller.register(waker.fd(), WAKER_TOKEN, Interest::READ)?;

        let shared = Arc::new(LoopShared {
            waker,
            inject: MpscQueue::new(config.inject_capacity, config.inject_event_size)?,
            commands: ArrayQueue::new(config.command_capacity),
            stopped: AtomicBool::new(false),
            clock: Arc::clone(&runtime.clock),
        });
        let timers = TimerQueue::new(config.timer_capacity)?;

        log_info!(
            "event loop opened: backend={} max_handles={} io_vectors={} max_timeout={:?}",
            P::NAME,
            config.max_handles,
            config.io_vector_count,
            config.max_timeout
        );

        Ok(Self {
            clock: Arc::clone(&runtime.clock),
            poller,
            slots: Vec::new(),
            free: Vec::new(),
            count: 0,
            fds: HashMap::new(),
            timers,
            deferred: Deferred::default(),
            events: Vec::with_capacity(config.io_vector_count),
            fired: Vec::new(),
            handle: LoopHandle { shared },
            loop_handler: Box::new(NoopLoopHandler),
            stats: LoopStats::default(),
            config,
        })
    }

    /// Replace the handler for injected events and loop timers.
    pub fn set_loop_handler<L: LoopEventHandler>(&mut self, handler: L) {
        self.loop_handler = Box::new(handler);
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        P::NAME
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Registered handlers.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.state(token) != HandlerState::Closed
    }

    /// `Closed` for tokens that are stale or were never issued.
    pub fn state(&self, token: Token) -> HandlerState {
        match self.slots.get(token.index() as usize) {
            Some(slot) if slot.generation == token.generation() => slot
                .entry
                .as_ref()
                .map_or(HandlerState::Closed, |e| e.state),
            _ => HandlerState::Closed,
        }
    }

    pub fn interest(&self, token: Token) -> Option<Interest> {
        match self.slots.get(token.index() as usize) {
            Some(slot) if slot.generation == token.generation() => {
                slot.entry.as_ref().map(|e| e.interest)
            }
            _ => None,
        }
    }

    /// Armed loop and handler timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Register a handler.
    ///
    /// Fails with `AlreadyRegistered` if its descriptor is in the table and
    /// `HandlerTableFull` at `max_handles`; the handler is then returned to
    /// its source. A connecting handler waits for write readiness; any other
    /// starts `Opened` with the requested interest. `handle_open` runs before
    /// this returns, and a negative result closes the handler again.
    pub fn add_handler(&mut self, new: NewHandler) -> Result<Token> {
        let fd = new.handler.fd();
        if self.fds.contains_key(&fd) {
            new.discard();
            return Err(SedaError::AlreadyRegistered);
        }
        if self.count >= self.config.max_handles {
            new.discard();
            return Err(SedaError::HandlerTableFull);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let token = Token::new(index, self.slots[index as usize].generation);

        let NewHandler {
            handler,
            interest,
            connecting,
            source,
        } = new;
        let (state, interest) = if connecting {
            (HandlerState::Connecting, Interest::WRITE)
        } else {
            (HandlerState::Opened, interest)
        };

        if let Err(e) = self.poller.register(fd, token.to_u64(), interest) {
            self.free.push(index);
            reclaim(handler, source);
            return Err(e);
        }

        self.slots[index as usize].entry = Some(Entry {
            handler,
            fd,
            state,
            interest,
            source,
            timers: Vec::new(),
        });
        self.fds.insert(fd, token);
        self.count += 1;
        self.stats.opened += 1;
        log_trace!("handler {:?} fd={} added as {:?}", token, fd, state);

        let now = self.clock.now_ms();
        self.invoke(token, now, |h, ctx| h.handle_open(ctx));
        Ok(token)
    }

    /// Unregister and close a handler.
    ///
    /// `handle_close` runs once and the handler goes back to its source. A
    /// second call for the same token returns `NotRegistered` and does
    /// nothing.
    pub fn delete_handler(&mut self, token: Token) -> Result<()> {
        self.close_token(token)
    }

    pub fn set_interest(&mut self, token: Token, interest: Interest) -> Result<()> {
        let entry = lookup(&mut self.slots, token).ok_or(SedaError::NotRegistered)?;
        if entry.interest != interest {
            self.poller.reregister(entry.fd, token.to_u64(), interest)?;
            entry.interest = interest;
        }
        Ok(())
    }

    /// Arm a timer from the owning thread.
    ///
    /// A `Handler` target must be registered (`NotRegistered` otherwise) and
    /// its timer is cancelled when that handler closes.
    pub fn set_timer(
        &mut self,
        interval_ms: u64,
        target: TimerTarget,
        cyclic: bool,
    ) -> Result<TimerHandle> {
        let now = self.clock.now_ms();
        match target {
            TimerTarget::Handler { token, .. } => {
                let entry = lookup(&mut self.slots, token).ok_or(SedaError::NotRegistered)?;
                let handle = self.timers.set_timer(interval_ms, target, cyclic, now)?;
                attach_timer(&self.timers, entry, handle);
                Ok(handle)
            }
            TimerTarget::Loop { .. } => self.timers.set_timer(interval_ms, target, cyclic, now),
        }
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) -> Result<TimerTarget> {
        self.timers.cancel_timer(handle)
    }

    /// Run one dispatch round, waiting at most `timeout` (capped by
    /// `max_timeout`) for readiness. Returns the number of readiness
    /// reports handled.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let shared = Arc::clone(&self.handle.shared);
        let now = self.clock.now_ms();

        let mut wait = match timeout {
            Some(t) => t.min(self.config.max_timeout),
            None => self.config.max_timeout,
        };
        if let Some(at) = self.timers.next_expire_time() {
            wait = wait.min(Duration::from_millis(at.saturating_sub(now)));
        }
        if !shared.commands.is_empty() || !shared.inject.is_empty() || !self.deferred.is_empty() {
            wait = Duration::ZERO;
        }

        let mut events = mem::take(&mut self.events);
        events.clear();
        let polled = self
            .poller
            .poll(&mut events, self.config.io_vector_count, Some(wait));
        self.stats.polls += 1;
        let n = match polled {
            Ok(n) => n,
            Err(e) => {
                self.events = events;
                return Err(e);
            }
        };

        let now = self.clock.now_ms();
        for ev in &events {
            self.dispatch(*ev, now);
        }
        self.events = events;
        self.apply_deferred();

        self.apply_commands(&shared);
        self.apply_deferred();

        self.drain_injected(&shared, now);
        self.apply_deferred();

        self.expire_timers();
        self.apply_deferred();
        Ok(n)
    }

    /// Dispatch rounds until [`LoopHandle::stop`].
    pub fn run(&mut self) -> Result<()> {
        log_debug!("event loop running ({})", P::NAME);
        while !self.handle.is_stopped() {
            self.run_once(None)?;
        }
        log_debug!("event loop stopped: {:?}", self.stats);
        Ok(())
    }

    /// Close every handler and drop queued registrations.
    pub fn shutdown(&mut self) {
        let live: Vec<Token> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(i, slot)| Token::new(i as u32, slot.generation))
            .collect();
        for token in live {
            let _ = self.close_token(token);
        }
        for handler in mem::take(&mut self.deferred.adds) {
            handler.discard();
        }
        while let Some(cmd) = self.handle.shared.commands.pop() {
            if let Command::Add(handler) = cmd {
                handler.discard();
            }
        }
    }

    fn dispatch(&mut self, ev: PollEvent, now: u64) {
        if ev.token == WAKER_TOKEN {
            self.handle.shared.waker.drain();
            self.stats.wakeups += 1;
            return;
        }
        let token = Token::from_u64(ev.token);
        let state = match lookup(&mut self.slots, token) {
            Some(entry) => entry.state,
            None => return,
        };
        self.stats.io_events += 1;

        if state == HandlerState::Connecting {
            self.complete_connect(token, ev, now);
            return;
        }
        if ev.readable && !self.invoke(token, now, |h, ctx| h.handle_read(ctx)) {
            return;
        }
        if ev.writable && !self.invoke(token, now, |h, ctx| h.handle_write(ctx)) {
            return;
        }
        if ev.error || ev.hangup {
            let _ = self.close_token(token);
        }
    }

    /// Write readiness on a connecting socket: check `SO_ERROR`, switch to
    /// read interest and report the connection.
    fn complete_connect(&mut self, token: Token, ev: PollEvent, now: u64) {
        let Some(entry) = lookup(&mut self.slots, token) else {
            return;
        };
        let err = socket_error(entry.fd);
        if err != 0 || !(ev.writable || ev.readable) {
            log_debug!("handler {:?}: connect failed (errno {})", token, err);
            let _ = self.close_token(token);
            return;
        }
        if let Err(e) = self
            .poller
            .reregister(entry.fd, token.to_u64(), Interest::READ)
        {
            log_warn!("handler {:?}: switching to read interest failed: {}", token, e);
            let _ = self.close_token(token);
            return;
        }
        entry.state = HandlerState::Connected;
        entry.interest = Interest::READ;
        self.invoke(token, now, |h, ctx| h.handle_connect(ctx));
    }

    /// Run one handler callback and apply its outcome. Returns `false` once
    /// the handler has been closed.
    fn invoke<F>(&mut self, token: Token, now: u64, f: F) -> bool
    where
        F: FnOnce(&mut dyn IoHandler, &mut LoopContext<'_>) -> i32,
    {
        let Some(entry) = lookup(&mut self.slots, token) else {
            return false;
        };
        let (ret, close, new_interest) = {
            let mut ctx = LoopContext::new(
                Some(token),
                now,
                entry.interest,
                &mut self.timers,
                Some(&mut entry.timers),
                &mut self.deferred,
                &self.handle,
            );
            let ret = f(entry.handler.as_mut(), &mut ctx);
            let (close, new_interest) = ctx.outcome();
            (ret, close, new_interest)
        };

        let mut close = close || ret < 0;
        if !close {
            if let Some(interest) = new_interest.filter(|i| *i != entry.interest) {
                match self.poller.reregister(entry.fd, token.to_u64(), interest) {
                    Ok(()) => entry.interest = interest,
                    Err(e) => {
                        log_warn!("handler {:?}: interest change failed: {}", token, e);
                        close = true;
                    }
                }
            }
        }
        if close {
            let _ = self.close_token(token);
            return false;
        }
        true
    }

    fn close_token(&mut self, token: Token) -> Result<()> {
        let slot = match self.slots.get_mut(token.index() as usize) {
            Some(slot) if slot.generation == token.generation() => slot,
            _ => return Err(SedaError::NotRegistered),
        };
        let mut entry = slot.entry.take().ok_or(SedaError::NotRegistered)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index());
        self.count -= 1;
        self.fds.remove(&entry.fd);

        if let Err(e) = self.poller.deregister(entry.fd) {
            log_debug!("handler {:?}: deregister fd={}: {}", token, entry.fd, e);
        }

        let now = self.clock.now_ms();
        {
            let mut ctx = LoopContext::new(
                Some(token),
                now,
                entry.interest,
                &mut self.timers,
                Some(&mut entry.timers),
                &mut self.deferred,
                &self.handle,
            );
            entry.handler.handle_close(&mut ctx);
        }
        for handle in entry.timers.drain(..) {
            let _ = self.timers.cancel_timer(handle);
        }
        self.stats.closed += 1;
        log_trace!("handler {:?} fd={} closed", token, entry.fd);
        reclaim(entry.handler, entry.source);
        Ok(())
    }

    fn apply_commands(&mut self, shared: &LoopShared) {
        while let Some(cmd) = shared.commands.pop() {
            match cmd {
                Command::Add(handler) => {
                    if let Err(e) = self.add_handler(handler) {
                        log_warn!("remote add_handler failed: {}", e);
                    }
                }
                Command::Delete(token) => {
                    if let Err(e) = self.close_token(token) {
                        log_debug!("remote delete_handler {:?}: {}", token, e);
                    }
                }
                Command::Interest(token, interest) => {
                    if let Err(e) = self.set_interest(token, interest) {
                        log_debug!("remote set_interest {:?}: {}", token, e);
                    }
                }
            }
        }
    }

    fn apply_deferred(&mut self) {
        while !self.deferred.is_empty() {
            let Deferred {
                adds,
                closes,
                interests,
                timers,
            } = mem::take(&mut self.deferred);
            for (token, handle) in timers {
                match lookup(&mut self.slots, token) {
                    Some(entry) => attach_timer(&self.timers, entry, handle),
                    None => {
                        let _ = self.timers.cancel_timer(handle);
                    }
                }
            }
            for token in closes {
                let _ = self.close_token(token);
            }
            for (token, interest) in interests {
                if let Err(e) = self.set_interest(token, interest) {
                    log_debug!("set_interest {:?}: {}", token, e);
                }
            }
            for handler in adds {
                if let Err(e) = self.add_handler(handler) {
                    log_warn!("add_handler failed: {}", e);
                }
            }
        }
    }

    /// Hand at most `inject_capacity` queued events to the loop handler.
    fn drain_injected(&mut self, shared: &LoopShared, now: u64) -> usize {
        let mut ctx = LoopContext::new(
            None,
            now,
            Interest::NONE,
            &mut self.timers,
            None,
            &mut self.deferred,
            &self.handle,
        );
        let handler = &mut self.loop_handler;
        let n = shared.inject.drain(self.config.inject_capacity, |ev| {
            if ev.type_id() != WAKE_EVENT_TYPE {
                handler.handle_event(ev, &mut ctx);
            }
        });
        self.stats.injected += n as u64;
        n
    }

    fn expire_timers(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut fired = mem::take(&mut self.fired);
        self.timers
            .expire(now, |handle, target| fired.push((handle, *target)));
        let n = fired.len();

        for (handle, target) in fired.drain(..) {
            match target {
                TimerTarget::Handler { token, param } => {
                    if lookup(&mut self.slots, token).is_some() {
                        self.invoke(token, now, |h, ctx| h.handle_timeout(param, ctx));
                    } else {
                        // owner is gone; stops a cyclic timer from re-firing
                        let _ = self.timers.cancel_timer(handle);
                    }
                }
                TimerTarget::Loop { param } => {
                    let mut ctx = LoopContext::new(
                        None,
                        now,
                        Interest::NONE,
                        &mut self.timers,
                        None,
                        &mut self.deferred,
                        &self.handle,
                    );
                    self.loop_handler.handle_timeout(param, &mut ctx);
                }
            }
        }
        self.fired = fired;
        self.stats.timers_fired += n as u64;
        n
    }
}

impl<P: Poller> Drop for EventLoop<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::SelectPoller;
    use crate::reactor::test_support::{read_some, socketpair, write_all};
    use seda_core::event::EventHeader;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::{mpsc, Mutex};
    use std::thread;

    fn open_loop(max_handles: usize) -> EventLoop {
        let config = LoopConfig::new()
            .max_handles(max_handles)
            .max_timeout(Duration::from_millis(50));
        EventLoop::open(config, &RuntimeContext::new()).unwrap()
    }

    fn open_select_loop(max_handles: usize) -> EventLoop<SelectPoller> {
        let config = LoopConfig::new()
            .max_handles(max_handles)
            .max_timeout(Duration::from_millis(50));
        EventLoop::<SelectPoller>::open(config, &RuntimeContext::new()).unwrap()
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        reads: AtomicUsize,
        connected: AtomicUsize,
        closed: AtomicUsize,
        timeouts: AtomicUsize,
        last_param: AtomicU64,
    }

    impl Counters {
        fn get(c: &AtomicUsize) -> usize {
            c.load(Ordering::SeqCst)
        }
    }

    struct Recorder {
        fd: RawFd,
        counters: Arc<Counters>,
        fail_read: bool,
        timer: Option<(u64, bool)>,
    }

    impl Recorder {
        fn new(fd: RawFd, counters: &Arc<Counters>) -> Self {
            Self {
                fd,
                counters: Arc::clone(counters),
                fail_read: false,
                timer: None,
            }
        }
    }

    impl IoHandler for Recorder {
        fn fd(&self) -> RawFd {
            self.fd
        }

        fn handle_open(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            if let Some((ms, cyclic)) = self.timer {
                if ctx.set_timer(ms, 7, cyclic).is_err() {
                    return -1;
                }
            }
            0
        }

        fn handle_read(&mut self, _ctx: &mut LoopContext<'_>) -> i32 {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            let data = read_some(self.fd);
            if self.fail_read || data.is_empty() {
                -1
            } else {
                0
            }
        }

        fn handle_connect(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
            assert_eq!(ctx.interest(), Interest::READ);
            self.counters.connected.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn handle_close(&mut self, _ctx: &mut LoopContext<'_>) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_timeout(&mut self, param: u64, _ctx: &mut LoopContext<'_>) -> i32 {
            self.counters.timeouts.fetch_add(1, Ordering::SeqCst);
            self.counters.last_param.store(param, Ordering::SeqCst);
            0
        }
    }

    #[derive(Default)]
    struct CountingSource(AtomicUsize);

    impl EventSource for CountingSource {
        fn reclaim(&self, _handler: Box<dyn IoHandler>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Ping {
        header: EventHeader,
        n: u64,
    }

    unsafe impl EventRecord for Ping {
        const TYPE_ID: u32 = 42;
    }

    struct Collect(Arc<Mutex<Vec<u64>>>);

    impl LoopEventHandler for Collect {
        fn handle_event(&mut self, event: seda_core::RawEvent<'_>, _ctx: &mut LoopContext<'_>) {
            if let Some(ping) = event.decode::<Ping>() {
                self.0.lock().unwrap().push(ping.n);
            }
        }

        fn handle_timeout(&mut self, param: u64, _ctx: &mut LoopContext<'_>) {
            self.0.lock().unwrap().push(1000 + param);
        }
    }

    #[test]
    fn test_delete_twice_closes_once() {
        let mut lp = open_loop(8);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());

        let token = lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();
        assert_eq!(Counters::get(&c.opened), 1);
        assert_eq!(lp.state(token), HandlerState::Opened);
        assert_eq!(lp.len(), 1);

        lp.delete_handler(token).unwrap();
        assert_eq!(lp.delete_handler(token), Err(SedaError::NotRegistered));
        assert_eq!(Counters::get(&c.closed), 1);
        assert_eq!(lp.state(token), HandlerState::Closed);
        assert!(lp.is_empty());
    }

    #[test]
    fn test_stale_token_after_slot_reuse() {
        let mut lp = open_loop(8);
        let (a, b) = socketpair();
        let c = Arc::new(Counters::default());

        let first = lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();
        lp.delete_handler(first).unwrap();
        let second = lp.add_handler(NewHandler::new(Recorder::new(b.raw(), &c))).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(lp.delete_handler(first), Err(SedaError::NotRegistered));
        assert!(lp.is_registered(second));
    }

    #[test]
    fn test_registration_conflicts_reclaim() {
        let mut lp = open_loop(1);
        let (a, b) = socketpair();
        let c = Arc::new(Counters::default());
        let source = Arc::new(CountingSource::default());

        lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();

        let dup = NewHandler::new(Recorder::new(a.raw(), &c)).source(source.clone());
        assert_eq!(lp.add_handler(dup), Err(SedaError::AlreadyRegistered));
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        let extra = NewHandler::new(Recorder::new(b.raw(), &c)).source(source.clone());
        assert_eq!(lp.add_handler(extra), Err(SedaError::HandlerTableFull));
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
        assert_eq!(Counters::get(&c.opened), 1);
    }

    #[test]
    fn test_negative_read_closes() {
        let mut lp = open_loop(8);
        let (a, b) = socketpair();
        let c = Arc::new(Counters::default());
        let source = Arc::new(CountingSource::default());

        let mut recorder = Recorder::new(a.raw(), &c);
        recorder.fail_read = true;
        let token = lp
            .add_handler(NewHandler::new(recorder).source(source.clone()))
            .unwrap();

        write_all(&b, b"hello");
        lp.run_once(Some(Duration::from_millis(200))).unwrap();

        assert_eq!(Counters::get(&c.reads), 1);
        assert_eq!(Counters::get(&c.closed), 1);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert!(!lp.is_registered(token));
        assert_eq!(lp.stats().closed, 1);
    }

    #[test]
    fn test_connect_completion_switches_to_read() {
        let mut lp = open_loop(8);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());

        let token = lp
            .add_handler(NewHandler::new(Recorder::new(a.raw(), &c)).connecting())
            .unwrap();
        assert_eq!(lp.state(token), HandlerState::Connecting);
        assert_eq!(lp.interest(token), Some(Interest::WRITE));

        lp.run_once(Some(Duration::from_millis(200))).unwrap();

        assert_eq!(Counters::get(&c.connected), 1);
        assert_eq!(lp.state(token), HandlerState::Connected);
        assert_eq!(lp.interest(token), Some(Interest::READ));
    }

    #[test]
    fn test_wakeup_coalesces() {
        let mut lp = open_loop(4);
        let h = lp.handle();

        assert!(h.wakeup().unwrap());
        assert!(!h.wakeup().unwrap());
        assert!(!h.wakeup().unwrap());
        assert_eq!(h.wake_notifications(), 1);

        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(lp.stats().wakeups, 1);

        assert!(h.wakeup().unwrap());
        assert_eq!(h.wake_notifications(), 2);
    }

    #[test]
    fn test_injected_events_reach_loop_handler() {
        let mut lp = open_loop(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        lp.set_loop_handler(Collect(Arc::clone(&seen)));

        let h = lp.handle();
        thread::spawn(move || {
            for n in 0..5 {
                let ping = Ping {
                    header: EventHeader::for_record::<Ping>(0),
                    n,
                };
                h.push_event(&ping).unwrap();
            }
        })
        .join()
        .unwrap();

        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(lp.stats().injected, 5);
        assert_eq!(lp.handle().pending_events(), 0);
    }

    #[test]
    fn test_loop_timer_fires() {
        let mut lp = open_loop(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        lp.set_loop_handler(Collect(Arc::clone(&seen)));
        lp.set_timer(20, TimerTarget::Loop { param: 3 }, false)
            .unwrap();

        for _ in 0..20 {
            lp.run_once(Some(Duration::from_millis(100))).unwrap();
            if !seen.lock().unwrap().is_empty() {
                break;
            }
        }
        assert_eq!(*seen.lock().unwrap(), vec![1003]);
        assert_eq!(lp.pending_timers(), 0);
    }

    #[test]
    fn test_handler_timer_fires() {
        let mut lp = open_loop(4);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());
        let mut recorder = Recorder::new(a.raw(), &c);
        recorder.timer = Some((10, false));
        lp.add_handler(NewHandler::new(recorder)).unwrap();

        for _ in 0..20 {
            lp.run_once(Some(Duration::from_millis(100))).unwrap();
            if Counters::get(&c.timeouts) > 0 {
                break;
            }
        }
        assert_eq!(Counters::get(&c.timeouts), 1);
        assert_eq!(c.last_param.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_cyclic_timer_dropped_with_handler() {
        let mut lp = open_loop(4);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());
        let mut recorder = Recorder::new(a.raw(), &c);
        recorder.timer = Some((5, true));
        let token = lp.add_handler(NewHandler::new(recorder)).unwrap();
        assert_eq!(lp.pending_timers(), 1);

        lp.delete_handler(token).unwrap();
        assert_eq!(lp.pending_timers(), 0);
        lp.run_once(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(Counters::get(&c.timeouts), 0);
    }

    #[test]
    fn test_handler_churn_returns_timer_nodes() {
        let config = LoopConfig::new()
            .max_handles(4)
            .timer_capacity(2)
            .max_timeout(Duration::from_millis(50));
        let mut lp: EventLoop = EventLoop::open(config, &RuntimeContext::new()).unwrap();
        let c = Arc::new(Counters::default());

        for _ in 0..5 {
            let (a, _b) = socketpair();
            let mut recorder = Recorder::new(a.raw(), &c);
            recorder.timer = Some((60_000, false));
            let token = lp.add_handler(NewHandler::new(recorder)).unwrap();
            assert!(lp.is_registered(token));
            assert_eq!(lp.pending_timers(), 1);
            lp.delete_handler(token).unwrap();
            assert_eq!(lp.pending_timers(), 0);
        }
        assert_eq!(Counters::get(&c.opened), 5);
        assert_eq!(Counters::get(&c.closed), 5);
    }

    #[test]
    fn test_timer_for_peer_cancelled_when_peer_closes() {
        let mut lp = open_loop(4);
        let (a, _b) = socketpair();
        let (x, _y) = socketpair();
        let c = Arc::new(Counters::default());
        let peer = lp.add_handler(NewHandler::new(Recorder::new(x.raw(), &c))).unwrap();
        let owner = lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();

        let target = TimerTarget::Handler { token: peer, param: 3 };
        lp.set_timer(60_000, target, true).unwrap();
        assert_eq!(lp.pending_timers(), 1);

        lp.delete_handler(owner).unwrap();
        assert_eq!(lp.pending_timers(), 1);
        lp.delete_handler(peer).unwrap();
        assert_eq!(lp.pending_timers(), 0);

        let stale = TimerTarget::Handler { token: peer, param: 3 };
        assert!(matches!(
            lp.set_timer(10, stale, false),
            Err(SedaError::NotRegistered)
        ));
        assert_eq!(lp.pending_timers(), 0);
    }

    #[test]
    fn test_select_backend_dispatches_and_closes() {
        let mut lp = open_select_loop(8);
        let (a, b) = socketpair();
        let (x, y) = socketpair();
        let c = Arc::new(Counters::default());
        let source = Arc::new(CountingSource::default());

        let reader = lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();
        let mut failing = Recorder::new(x.raw(), &c);
        failing.fail_read = true;
        let doomed = lp
            .add_handler(NewHandler::new(failing).source(source.clone()))
            .unwrap();

        write_all(&b, b"ping");
        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(Counters::get(&c.reads), 1);
        assert!(lp.is_registered(reader));

        write_all(&y, b"boom");
        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(Counters::get(&c.reads), 2);
        assert!(!lp.is_registered(doomed));
        assert_eq!(Counters::get(&c.closed), 1);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert!(lp.is_registered(reader));
    }

    #[test]
    fn test_select_backend_connect_completion() {
        let mut lp = open_select_loop(4);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());

        let token = lp
            .add_handler(NewHandler::new(Recorder::new(a.raw(), &c)).connecting())
            .unwrap();
        assert_eq!(lp.interest(token), Some(Interest::WRITE));

        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(Counters::get(&c.connected), 1);
        assert_eq!(lp.state(token), HandlerState::Connected);
        assert_eq!(lp.interest(token), Some(Interest::READ));
    }

    #[test]
    fn test_select_backend_wakeup_delivers_injected() {
        let config = LoopConfig::new()
            .max_handles(4)
            .max_timeout(Duration::from_secs(10));
        let mut lp = EventLoop::<SelectPoller>::open(config, &RuntimeContext::new()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        lp.set_loop_handler(Collect(Arc::clone(&seen)));
        let h = lp.handle();

        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let ping = Ping {
                header: EventHeader::for_record::<Ping>(0),
                n: 9,
            };
            h.push_event(&ping).unwrap();
        });

        // blocks in select(2) until the push wakes it
        let started = std::time::Instant::now();
        lp.run_once(None).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        pusher.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![9]);
        assert!(lp.stats().wakeups >= 1);
        assert!(lp.handle().wakeup().unwrap());
    }

    #[test]
    fn test_select_backend_handler_timer() {
        let mut lp = open_select_loop(4);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());
        let mut recorder = Recorder::new(a.raw(), &c);
        recorder.timer = Some((10, false));
        let token = lp.add_handler(NewHandler::new(recorder)).unwrap();

        for _ in 0..20 {
            lp.run_once(Some(Duration::from_millis(100))).unwrap();
            if Counters::get(&c.timeouts) > 0 {
                break;
            }
        }
        assert_eq!(Counters::get(&c.timeouts), 1);
        lp.delete_handler(token).unwrap();
        assert_eq!(lp.pending_timers(), 0);
    }

    #[test]
    fn test_remote_add_applied_on_loop_thread() {
        let mut lp = open_loop(4);
        let (a, _b) = socketpair();
        let c = Arc::new(Counters::default());
        let h = lp.handle();
        let fd = a.raw();
        let c2 = Arc::clone(&c);

        thread::spawn(move || h.add_handler(NewHandler::new(Recorder::new(fd, &c2))).unwrap())
            .join()
            .unwrap();
        assert!(lp.is_empty());

        lp.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(lp.len(), 1);
        assert_eq!(Counters::get(&c.opened), 1);
    }

    #[test]
    fn test_run_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let t = thread::spawn(move || {
            let mut lp = open_loop(4);
            tx.send(lp.handle()).unwrap();
            lp.run().unwrap();
            lp.stats().polls
        });
        let h = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        h.stop();
        assert!(t.join().unwrap() >= 1);
        assert!(h.is_stopped());
    }

    #[test]
    fn test_drop_closes_all() {
        let (a, b) = socketpair();
        let c = Arc::new(Counters::default());
        {
            let mut lp = open_loop(4);
            lp.add_handler(NewHandler::new(Recorder::new(a.raw(), &c))).unwrap();
            lp.add_handler(NewHandler::new(Recorder::new(b.raw(), &c))).unwrap();
        }
        assert_eq!(Counters::get(&c.closed), 2);
    }
}
