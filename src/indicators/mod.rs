// Technical indicators
pub mod atr;

pub use atr::{calculate_atr, calculate_atr_series};
