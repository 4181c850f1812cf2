// =============================================================================
// Strategy boundary
// =============================================================================

pub mod controller;
pub mod ema_cross;

pub use controller::StrategyController;
pub use ema_cross::CrossEma;

use crate::broker::Broker;
use crate::dataframe::Dataframe;
use crate::timeframe::Timeframe;

/// A trading strategy plugged into the rolling-window controller.
///
/// `indicators` populates metadata columns on the warmed-up sample;
/// `on_candle` turns the sample and current position into order intents. Both
/// run synchronously on the feed dispatch task.
pub trait Strategy: Send + Sync {
    /// Bar interval this strategy trades on.
    fn timeframe(&self) -> Timeframe;

    /// Minimum number of bars required before `on_candle` may run.
    fn warmup_period(&self) -> usize;

    /// Compute indicator columns over the sample window.
    fn indicators(&self, df: &mut Dataframe);

    /// Decision step, invoked once per accepted bar after warmup while the
    /// controller is started.
    fn on_candle(&self, df: &Dataframe, broker: &dyn Broker);
}
