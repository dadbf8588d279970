#![doc = "Common types shared across the muon-station workspace."]

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod state;

pub use config::*;
pub use error::*;
pub use events::*;
pub use metrics::*;
pub use state::*;
