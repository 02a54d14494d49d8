// Market data: symbol tables and bar providers
pub mod provider;
pub mod symbols;

pub use provider::{CsvBarProvider, DataProvider};
pub use symbols::{default_spread, oanda_instrument, pip_size, pip_value, symbol_currencies};
