// src/chefext/mod.rs — Chef VM extension handler modules
// Maintained by the chef-extension contributors | © 2025 | MIT licensed

pub mod bootstrap;
pub mod config;
pub mod correlator;
pub mod enable;
pub mod error;
pub mod heartbeat;
pub mod platform;
pub mod process;
pub mod runlist;
pub mod secrets;
pub mod service;
pub mod settings;
