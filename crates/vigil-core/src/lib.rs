//! Vigil core: sustained heart-rate anomaly detection and confirmation-aware notification gating.

pub mod domain;
pub mod settings;
pub mod error;
pub mod validation;
pub mod movement;
pub mod severity;
pub mod analyzer;
pub mod rate_limit;
pub mod ports;
pub mod engine;

pub use domain::*;
pub use settings::*;
pub use error::*;
pub use validation::*;
pub use movement::*;
pub use severity::*;
pub use analyzer::*;
pub use rate_limit::*;
pub use ports::*;
pub use engine::*;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests_engine;
#[cfg(test)]
mod tests_race;
