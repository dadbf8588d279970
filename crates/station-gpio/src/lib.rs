//! GPIO plane for the detector station.
//!
//! This crate provides:
//! - [`GpioDriver`] and [`EdgeHandler`] traits at the hardware seam
//! - [`pins`] module mapping BCM pins to logical signal roles
//! - [`classify`] module with the edge classifier and pileup filter
//! - [`dispatch`] module with the [`EventSink`](dispatch::EventSink) fan-out
//! - [`sim`] module with a simulated driver (virtual tick counter)
//! - [`pigpiod`] module with the pigpiod socket client (feature `pigpiod`)

pub mod classify;
pub mod dispatch;
#[cfg(feature = "pigpiod")]
pub mod pigpiod;
pub mod pins;
pub mod sim;

pub use classify::{ClassifierStats, ClassifierStatsSnapshot, EdgeClassifier};
pub use dispatch::{EventDispatcher, EventSink};
pub use pins::{PinMap, WatchedPin};
pub use sim::SimulatedGpioDriver;

use station_common::error::StationResult;
use station_timing::TickSource;

/// Edge direction reported by the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolarity {
    /// Low-to-high transition.
    Rising,
    /// High-to-low transition.
    Falling,
}

impl std::fmt::Display for EdgePolarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
        }
    }
}

/// One GPIO edge as delivered by a driver.
///
/// `raw_tick` is the driver's free-running microsecond counter at the
/// instant the edge was latched; it wraps at 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// BCM pin number.
    pub gpio: u8,
    /// Edge direction.
    pub polarity: EdgePolarity,
    /// Hardware tick at the edge.
    pub raw_tick: u32,
}

/// Consumer of edge events, injected into a driver.
///
/// Called from the driver's notification context, one edge at a time.
/// Returning an error is fatal for the driver: it must stop its polling
/// loop and go non-operational rather than retry.
pub trait EdgeHandler: Send {
    /// Process one edge.
    fn handle_edge(&mut self, edge: EdgeEvent) -> StationResult<()>;
}

/// GPIO driver abstraction.
///
/// Defines the interface the daemon wires against, so that the pigpiod
/// socket backend and the simulated backend are interchangeable.
pub trait GpioDriver: Send {
    /// Bring up the hardware and register edge watches.
    ///
    /// Sets pin modes and pull-ups per the pin map and arms the edge
    /// notifications. Failure here is `HardwareUnavailable`: fatal at
    /// startup, never retried.
    fn initialize(&mut self, pins: &PinMap) -> StationResult<()>;

    /// Inject the edge handler and start delivering edges to it.
    fn attach(&mut self, handler: Box<dyn EdgeHandler>) -> StationResult<()>;

    /// Read the free-running tick counter once.
    fn current_tick(&self) -> StationResult<u32>;

    /// Hand out an owned tick-source handle for the calibration thread.
    ///
    /// The handle must remain valid while the driver is operational and
    /// read the same counter as [`current_tick`](Self::current_tick).
    fn tick_source(&self) -> StationResult<Box<dyn TickSource + Send>>;

    /// Stop edge delivery and release the hardware.
    fn stop(&mut self) -> StationResult<()>;

    /// Whether the driver is initialized and delivering edges.
    fn is_operational(&self) -> bool;
}
