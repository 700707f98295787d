//! Adapter trainer implementations.
//!
//! The backend-agnostic types live in `refinery-training`. This module
//! contains the concrete trainers used by the `refine` binary.

pub mod command_trainer;
pub mod unconfigured;

pub use command_trainer::CommandTrainer;
pub use unconfigured::UnconfiguredTrainer;
