//! Node configuration
//!
//! Defaults mirror a local development chain; every knob can be
//! overridden through `EMBER_*` environment variables.

pub mod settings;

pub use settings::Settings;
