// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math. Every function returns a series the
// same length as its input, padded with NaN where the look-back window is not
// yet filled, so the results can be attached to a `Dataframe` as index-aligned
// metadata columns.

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use ema::ema;
pub use macd::macd;
pub use rsi::rsi;
pub use sma::sma;
