//! Simulated GPIO backend for development without detector hardware.
//!
//! The virtual tick counter runs off a monotonic clock, optionally
//! dilated by a configured drift so the discipline loop has something
//! real to correct. A background thread can generate periodic edges on
//! the sampling-trigger pin plus a 1 Hz pulse on the time-pulse pin;
//! tests usually leave it disabled and inject edges directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use station_common::config::{GpioConfig, PinRole, SimConfig};
use station_common::error::{StationError, StationResult};
use station_timing::calibrate::TickSource;

use crate::pins::{PinMap, WatchedPin};
use crate::{EdgeEvent, EdgeHandler, EdgePolarity, GpioDriver};

/// Spacing of self-generated time pulses.
const SIM_PPS_INTERVAL: Duration = Duration::from_secs(1);

/// Virtual microsecond counter with configurable rate error.
#[derive(Debug)]
pub struct SimClock {
    start: Instant,
    drift_ppm: f64,
}

impl SimClock {
    fn new(drift_ppm: f64) -> Self {
        Self {
            start: Instant::now(),
            drift_ppm,
        }
    }

    fn tick_for(&self, elapsed: Duration) -> u32 {
        let elapsed_us = elapsed.as_micros() as f64;
        let scaled = elapsed_us * (1.0 + self.drift_ppm / 1e6);
        // Through u64 so the cast wraps instead of saturating.
        (scaled as u64) as u32
    }

    /// Current counter value; wraps like the hardware tick.
    #[must_use]
    pub fn current_tick(&self) -> u32 {
        self.tick_for(self.start.elapsed())
    }
}

struct SimTickSource {
    clock: Arc<SimClock>,
}

impl TickSource for SimTickSource {
    fn current_tick(&self) -> StationResult<u32> {
        Ok(self.clock.current_tick())
    }
}

/// GPIO driver backed by the virtual counter.
pub struct SimulatedGpioDriver {
    sim: SimConfig,
    trigger_role: PinRole,
    clock: Arc<SimClock>,
    handler: Arc<Mutex<Option<Box<dyn EdgeHandler>>>>,
    running: Arc<AtomicBool>,
    pulse_handle: Option<JoinHandle<()>>,
    pins: Option<PinMap>,
}

impl std::fmt::Debug for SimulatedGpioDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGpioDriver")
            .field("sim", &self.sim)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl SimulatedGpioDriver {
    /// Create a driver from the GPIO section of the configuration.
    #[must_use]
    pub fn new(config: &GpioConfig) -> Self {
        let sim = config.sim.clone().unwrap_or_default();
        Self {
            sim,
            trigger_role: config.sampling_trigger,
            clock: Arc::new(SimClock::new(0.0)),
            handler: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            pulse_handle: None,
            pins: None,
        }
    }

    /// Deliver one synthetic edge at the current counter value.
    pub fn inject_edge(&self, gpio: u8, polarity: EdgePolarity) {
        let raw_tick = self.clock.current_tick();
        self.inject_edge_at(gpio, polarity, raw_tick);
    }

    /// Deliver one synthetic edge with an explicit tick.
    pub fn inject_edge_at(&self, gpio: u8, polarity: EdgePolarity, raw_tick: u32) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        deliver(
            &self.handler,
            &self.running,
            EdgeEvent {
                gpio,
                polarity,
                raw_tick,
            },
        );
    }

    fn spawn_pulse_thread(&mut self) -> StationResult<()> {
        let interval = self.sim.pulse_interval;
        if interval.is_zero() {
            debug!("pulse generation disabled");
            return Ok(());
        }

        let pins = match &self.pins {
            Some(p) => p,
            None => return Err(StationError::Driver("attach before initialize".into())),
        };
        let trigger = watched_for(pins, self.trigger_role);
        let pps = watched_for(pins, PinRole::TimePulse);

        let handler = Arc::clone(&self.handler);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);

        let handle = match thread::Builder::new()
            .name("gpio-sim-pulse".into())
            .spawn(move || {
                debug!("Simulated pulse thread started");
                let mut last_pps = Instant::now();

                while running.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running.load(Ordering::Acquire) {
                        break;
                    }

                    let raw_tick = clock.current_tick();
                    if let Some(pin) = trigger {
                        deliver(
                            &handler,
                            &running,
                            EdgeEvent {
                                gpio: pin.gpio,
                                polarity: pin.polarity,
                                raw_tick,
                            },
                        );
                    }

                    if last_pps.elapsed() >= SIM_PPS_INTERVAL {
                        last_pps = Instant::now();
                        if let Some(pin) = pps {
                            deliver(
                                &handler,
                                &running,
                                EdgeEvent {
                                    gpio: pin.gpio,
                                    polarity: pin.polarity,
                                    raw_tick: clock.current_tick(),
                                },
                            );
                        }
                    }
                }
                debug!("Simulated pulse thread stopped");
            }) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(StationError::Driver(format!(
                    "failed to spawn pulse thread: {e}"
                )));
            }
        };

        self.pulse_handle = Some(handle);
        Ok(())
    }
}

fn watched_for(pins: &PinMap, role: PinRole) -> Option<WatchedPin> {
    pins.watched().iter().copied().find(|w| w.role == role)
}

fn deliver(
    handler: &Mutex<Option<Box<dyn EdgeHandler>>>,
    running: &AtomicBool,
    edge: EdgeEvent,
) {
    let mut guard = match handler.lock() {
        Ok(g) => g,
        Err(_) => {
            running.store(false, Ordering::Release);
            return;
        }
    };
    if let Some(h) = guard.as_mut() {
        if let Err(e) = h.handle_edge(edge) {
            error!(error = %e, "Edge handler fault, stopping simulated driver");
            running.store(false, Ordering::Release);
        }
    }
}

impl GpioDriver for SimulatedGpioDriver {
    fn initialize(&mut self, pins: &PinMap) -> StationResult<()> {
        for watched in pins.watched() {
            info!(
                gpio = watched.gpio,
                role = watched.role.as_str(),
                polarity = %watched.polarity,
                "Watching simulated pin"
            );
        }
        self.clock = Arc::new(SimClock::new(self.sim.tick_drift_ppm));
        self.pins = Some(pins.clone());
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn attach(&mut self, handler: Box<dyn EdgeHandler>) -> StationResult<()> {
        if self.pins.is_none() {
            return Err(StationError::Driver("attach before initialize".into()));
        }
        match self.handler.lock() {
            Ok(mut guard) => *guard = Some(handler),
            Err(_) => {
                return Err(StationError::Driver("edge handler mutex poisoned".into()));
            }
        }
        self.spawn_pulse_thread()
    }

    fn current_tick(&self) -> StationResult<u32> {
        Ok(self.clock.current_tick())
    }

    fn tick_source(&self) -> StationResult<Box<dyn TickSource + Send>> {
        Ok(Box::new(SimTickSource {
            clock: Arc::clone(&self.clock),
        }))
    }

    fn stop(&mut self) -> StationResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) && self.pulse_handle.is_none() {
            return Ok(());
        }
        if let Some(handle) = self.pulse_handle.take() {
            if handle.join().is_err() {
                warn!("Pulse thread panicked");
            }
        }
        info!("Simulated GPIO driver stopped");
        Ok(())
    }

    fn is_operational(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SimulatedGpioDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
