pub mod aggregate;
pub mod bias;
pub mod cache;
pub mod confluence;
pub mod engine;
pub mod execution;
pub mod indicator_bank;
pub mod models;
pub mod optimizer;
pub mod strategies;
pub mod validation;
pub mod walk_forward;

#[cfg(test)]
mod tests;

pub use engine::run_backtest;
pub use models::*;
pub use optimizer::{optimize, CancelFlag, OptimizeRequest};
pub use validation::validate;
pub use walk_forward::run_walk_forward;
