// Portfolio layer: session scheduling, the multi-engine state machine, status output
pub mod engine;
pub mod scheduler;
pub mod status;

pub use engine::{PortfolioEngine, PortfolioStats};
pub use scheduler::SessionWindow;
pub use status::{StatusSnapshot, StatusWriter};
