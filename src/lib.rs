// src/lib.rs — chef-extension library surface
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// The binary is a thin clap shell over `chefext`; integration tests drive the same modules.

pub mod chefext;

pub use chefext::enable::{Activation, EnableContext, EnableOrchestrator};
pub use chefext::error::{EnableError, Result};
