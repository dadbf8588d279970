//! Clock discipline for the detector station.
//!
//! The GPIO daemon timestamps edges with a free-running 32-bit
//! microsecond counter. This crate turns those raw ticks into absolute
//! UTC times: [`overflow`] extends the counter to 64 bits, [`calibrate`]
//! pairs ticks with wall-clock reads on a dedicated thread, [`regression`]
//! fits the offset history, [`cell`] publishes the fit lock-free to the
//! edge path, and [`synth`] evaluates it to stamp time pulses. [`realtime`]
//! holds the scheduling/mlock glue that keeps measurement jitter down.

pub mod calibrate;
pub mod cell;
pub mod overflow;
pub mod realtime;
pub mod regression;
pub mod synth;

pub use calibrate::{ClockCalibrator, ProgramEpoch, TickSource};
pub use cell::{ClockModelCell, ClockSnapshot};
pub use overflow::TickExtender;
pub use realtime::{init_realtime, RealtimeStatus};
pub use regression::{ClockModel, RegressionBuffer};
pub use synth::{synthesize, PulseTimestamp};
