// Ratioscope: ratio discovery and tracking for X.
//
// This is the library root. Each module corresponds to a major subsystem
// of the ratio-discovery engine.

pub mod config;
pub mod engine;
pub mod store;
pub mod xapi;
