//! Price Feeder Library
//!
//! Exchange price providers and block-height-bounded oracle vote broadcasting

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod oracle;
pub mod types;
