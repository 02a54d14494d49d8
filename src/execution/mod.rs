// Order execution: cost model and the per-symbol paper engine
pub mod costs;
pub mod engine;

pub use costs::{apply_costs, FillAction};
pub use engine::SymbolEngine;
