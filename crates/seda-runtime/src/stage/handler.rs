//! Stage handler contract

use seda_core::event::RawEvent;

use super::context::StageContext;

/// Per-thread event handler of a stage.
///
/// One instance is created per stage thread and only ever called from that
/// thread, so handlers keep plain mutable state.
#[allow(unused_variables)]
pub trait StageHandler: Send + 'static {
    /// Called on the stage thread before the first event.
    fn handle_open(&mut self, ctx: &mut StageContext<'_>) {}

    fn handle_event(&mut self, event: RawEvent<'_>, ctx: &mut StageContext<'_>);

    /// A timer armed with `set_timer` fired.
    fn handle_timeout(&mut self, param: u64, ctx: &mut StageContext<'_>) {}

    /// A timer in LRU slot `slot` fired.
    fn handle_lru_timeout(&mut self, slot: usize, param: u64, ctx: &mut StageContext<'_>) {}

    /// The queues drained (idle mode only).
    fn handle_idle(&mut self, ctx: &mut StageContext<'_>) {}

    /// Called once after the quit event, as the thread exits.
    fn handle_close(&mut self, ctx: &mut StageContext<'_>) {}
}
