//! Callback context and loop-level event handler

use seda_core::error::Result;
use seda_core::event::RawEvent;
use seda_core::timer::{TimerHandle, TimerQueue};

use super::event_loop::LoopHandle;
use super::handler::{NewHandler, Token};
use super::interest::Interest;

/// What a loop timer fires into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    /// `IoHandler::handle_timeout` of a registered handler
    Handler { token: Token, param: u64 },
    /// `LoopEventHandler::handle_timeout`
    Loop { param: u64 },
}

/// Structural changes requested during callbacks.
#[derive(Default)]
pub(crate) struct Deferred {
    pub adds: Vec<NewHandler>,
    pub closes: Vec<Token>,
    pub interests: Vec<(Token, Interest)>,
    /// Timers armed for a handler other than the one being called back
    pub timers: Vec<(Token, TimerHandle)>,
}

impl Deferred {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.closes.is_empty()
            && self.interests.is_empty()
            && self.timers.is_empty()
    }
}

/// Access to the loop from inside a callback.
///
/// Closing, adding handlers and interest changes for other handlers are
/// applied after the current callback returns. Timers are armed at once;
/// a timer aimed at a handler is cancelled when that handler closes.
pub struct LoopContext<'a> {
    token: Option<Token>,
    now_ms: u64,
    interest: Interest,
    new_interest: Option<Interest>,
    close: bool,
    timers: &'a mut TimerQueue<TimerTarget>,
    /// Timers owned by the handler being called back
    owned: Option<&'a mut Vec<TimerHandle>>,
    deferred: &'a mut Deferred,
    handle: &'a LoopHandle,
}

impl<'a> LoopContext<'a> {
    pub(crate) fn new(
        token: Option<Token>,
        now_ms: u64,
        interest: Interest,
        timers: &'a mut TimerQueue<TimerTarget>,
        owned: Option<&'a mut Vec<TimerHandle>>,
        deferred: &'a mut Deferred,
        handle: &'a LoopHandle,
    ) -> Self {
        Self {
            token,
            now_ms,
            interest,
            new_interest: None,
            close: false,
            timers,
            owned,
            deferred,
            handle,
        }
    }

    /// Token of the handler being called back; `None` in loop-level callbacks.
    #[inline]
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Loop time (ms on the runtime clock) at which this dispatch round began.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Current interest of this handler, including a change made in this
    /// callback.
    #[inline]
    pub fn interest(&self) -> Interest {
        self.new_interest.unwrap_or(self.interest)
    }

    pub fn set_interest(&mut self, interest: Interest) {
        self.new_interest = Some(interest);
    }

    /// Close this handler once the callback returns.
    pub fn close(&mut self) {
        self.close = true;
    }

    pub fn is_closing(&self) -> bool {
        self.close
    }

    /// Close another handler after this callback.
    pub fn close_handler(&mut self, token: Token) {
        if Some(token) == self.token {
            self.close = true;
        } else {
            self.deferred.closes.push(token);
        }
    }

    /// Change another handler's interest after this callback.
    pub fn set_interest_for(&mut self, token: Token, interest: Interest) {
        if Some(token) == self.token {
            self.new_interest = Some(interest);
        } else {
            self.deferred.interests.push((token, interest));
        }
    }

    /// Register a new handler after this callback (e.g. an accepted socket).
    pub fn add_handler(&mut self, handler: NewHandler) {
        self.deferred.adds.push(handler);
    }

    /// Arm a timer for this handler (or the loop handler in loop-level
    /// callbacks), firing `interval_ms` from now.
    pub fn set_timer(&mut self, interval_ms: u64, param: u64, cyclic: bool) -> Result<TimerHandle> {
        let target = match self.token {
            Some(token) => TimerTarget::Handler { token, param },
            None => TimerTarget::Loop { param },
        };
        self.set_timer_for(interval_ms, target, cyclic)
    }

    pub fn set_timer_for(
        &mut self,
        interval_ms: u64,
        target: TimerTarget,
        cyclic: bool,
    ) -> Result<TimerHandle> {
        let handle = self.timers.set_timer(interval_ms, target, cyclic, self.now_ms)?;
        if let TimerTarget::Handler { token, .. } = target {
            match self.owned.as_deref_mut() {
                Some(owned) if Some(token) == self.token => {
                    let timers = &*self.timers;
                    owned.retain(|h| timers.is_pending(*h));
                    owned.push(handle);
                }
                _ => self.deferred.timers.push((token, handle)),
            }
        }
        Ok(handle)
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) -> Result<()> {
        if let Some(owned) = self.owned.as_deref_mut() {
            owned.retain(|h| *h != handle);
        }
        self.timers.cancel_timer(handle).map(|_| ())
    }

    /// Restart a timer's countdown from now.
    pub fn update_timer(&mut self, handle: TimerHandle) -> Result<()> {
        self.timers.update_timer(handle, self.now_ms)
    }

    /// Cross-thread handle of this loop.
    pub fn handle(&self) -> &LoopHandle {
        self.handle
    }

    pub(crate) fn outcome(&self) -> (bool, Option<Interest>) {
        (self.close, self.new_interest)
    }
}

/// Per-loop handler for events injected through [`LoopHandle::push_event`]
/// and for loop-level timers.
#[allow(unused_variables)]
pub trait LoopEventHandler: Send + 'static {
    fn handle_event(&mut self, event: RawEvent<'_>, ctx: &mut LoopContext<'_>) {}

    fn handle_timeout(&mut self, param: u64, ctx: &mut LoopContext<'_>) {}
}

/// Discards injected events.
#[derive(Debug, Default)]
pub struct NoopLoopHandler;

impl LoopEventHandler for NoopLoopHandler {}
