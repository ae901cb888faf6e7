//! I/O handler contract and registration tokens

use std::any::Any;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use super::context::LoopContext;
use super::interest::Interest;
use super::source::EventSource;

/// Poll token reserved for the loop's waker.
pub const WAKER_TOKEN: u64 = u64::MAX;

/// Identifies one registration of a handler.
///
/// The generation half changes every time a handler table slot is freed, so
/// a token kept after `delete_handler` never reaches the slot's next owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Packed form handed to the poller.
    #[inline]
    pub const fn to_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}v{})", self.index, self.generation)
    }
}

/// Handler lifecycle as tracked by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Closed,
    /// Registered, not connection-oriented or accepted already connected
    Opened,
    /// Non-blocking connect in flight, waiting for write readiness
    Connecting,
    Connected,
}

/// Converts a boxed handler back into `Any` so a source can recover its
/// concrete type. Implemented for every `Send + 'static` type.
pub trait AsAnyBox {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> AsAnyBox for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Callbacks the event loop drives for one registered descriptor.
///
/// Callbacks returning `i32` signal failure with a negative value; the loop
/// then closes the handler. Every callback runs on the loop thread.
///
/// `handle_close` is invoked exactly once per registration, after the
/// descriptor has been removed from the poller. The descriptor itself is
/// owned by the handler and is closed when the handler is dropped or reset.
#[allow(unused_variables)]
pub trait IoHandler: AsAnyBox + Send + 'static {
    fn fd(&self) -> RawFd;

    fn handle_open(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        0
    }

    fn handle_read(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        0
    }

    fn handle_write(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        0
    }

    /// A pending connect completed successfully. Interest is already READ.
    fn handle_connect(&mut self, ctx: &mut LoopContext<'_>) -> i32 {
        0
    }

    fn handle_close(&mut self, ctx: &mut LoopContext<'_>) {}

    /// A timer armed through [`LoopContext::set_timer`] fired.
    fn handle_timeout(&mut self, param: u64, ctx: &mut LoopContext<'_>) -> i32 {
        0
    }
}

/// A handler plus its registration options, ready for `add_handler`.
pub struct NewHandler {
    pub(crate) handler: Box<dyn IoHandler>,
    pub(crate) interest: Interest,
    pub(crate) connecting: bool,
    pub(crate) source: Option<Arc<dyn EventSource>>,
}

impl NewHandler {
    pub fn new<H: IoHandler>(handler: H) -> Self {
        Self::boxed(Box::new(handler))
    }

    pub fn boxed(handler: Box<dyn IoHandler>) -> Self {
        Self {
            handler,
            interest: Interest::READ,
            connecting: false,
            source: None,
        }
    }

    /// Initial interest (default `READ`).
    pub fn interest(mut self, interest: Interest) -> Self {
        self.interest = interest;
        self
    }

    /// The descriptor has a non-blocking connect in progress.
    pub fn connecting(mut self) -> Self {
        self.connecting = true;
        self
    }

    /// Return the handler to `source` once it is closed.
    pub fn source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn fd(&self) -> RawFd {
        self.handler.fd()
    }

    /// Hand the handler back to its source, or drop it.
    pub(crate) fn discard(self) {
        match self.source {
            Some(source) => source.reclaim(self.handler),
            None => drop(self.handler),
        }
    }
}

impl fmt::Debug for NewHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewHandler")
            .field("fd", &self.handler.fd())
            .field("interest", &self.interest)
            .field("connecting", &self.connecting)
            .field("pooled", &self.source.is_some())
            .finish()
    }
}
