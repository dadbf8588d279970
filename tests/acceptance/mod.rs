//! Acceptance test modules for the station daemon.
//!
//! - `discipline_test`: clock calibration and timestamp synthesis,
//!   both against synthetic samples and the live simulated counter
//! - `pipeline_test`: edge classification through the simulated
//!   driver, inhibit and liveness handling, config file loading
//! - `realtime_test`: scheduler, affinity, and memory-locking setup
//! - `soak_test`: long-duration stability and drift tracking

mod discipline_test;
mod pipeline_test;
mod realtime_test;
mod soak_test;
