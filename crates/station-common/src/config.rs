//! Configuration structures for the station daemon.
//!
//! Supports TOML deserialization with defaults matching the deployed
//! detector hardware; every field can be overridden per site.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level station configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Station identifier (appears in logs and diagnostics).
    pub station_id: String,

    /// GPIO driver, pin map, and edge filtering configuration.
    pub gpio: GpioConfig,

    /// Sampling-trigger gating configuration.
    pub sampling: SamplingConfig,

    /// Clock measurement and regression configuration.
    pub clock: ClockConfig,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Diagnostics reporting configuration.
    pub diagnostics: DiagnosticsConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: String::from("0"),
            gpio: GpioConfig::default(),
            sampling: SamplingConfig::default(),
            clock: ClockConfig::default(),
            realtime: RealtimeConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// GPIO driver and edge filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// GPIO backend.
    pub driver: GpioDriverKind,

    /// Logical signal to BCM pin assignments.
    pub pins: PinAssignments,

    /// Which logical signal drives the external sampling chain.
    pub sampling_trigger: PinRole,

    /// Pileup window: edges closer than this many ticks to the previous
    /// edge count towards the pileup counter.
    pub pileup_window_ticks: u32,

    /// Pileup counter value above which edges are dropped as noise.
    pub pileup_threshold: u16,

    /// Minimum tick spacing between generic per-pin signals.
    pub generic_deadtime_ticks: u32,

    /// pigpiod backend settings (used when `driver = "pigpiod"`).
    pub pigpiod: Option<PigpiodConfig>,

    /// Simulated backend settings (used when `driver = "simulated"`).
    pub sim: Option<SimConfig>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            driver: GpioDriverKind::Simulated,
            pins: PinAssignments::default(),
            sampling_trigger: PinRole::EventXor,
            pileup_window_ticks: 100,
            pileup_threshold: 50,
            generic_deadtime_ticks: 1000,
            pigpiod: None,
            sim: None,
        }
    }
}

/// Supported GPIO backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GpioDriverKind {
    /// Virtual tick counter and synthetic edges for testing.
    #[default]
    Simulated,
    /// pigpiod socket interface on a Raspberry Pi.
    Pigpiod,
}

/// Logical signal roles wired to GPIO pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinRole {
    /// Coincidence (AND) discriminator output.
    EventAnd,
    /// XOR discriminator output.
    EventXor,
    /// GNSS pulse-per-second input.
    TimePulse,
    /// ADC conversion-ready line.
    AdcReady,
    /// TDC interrupt line (active low; watched on the falling edge).
    TdcInterrupt,
}

impl PinRole {
    /// All roles, in declaration order.
    pub const ALL: [PinRole; 5] = [
        PinRole::EventAnd,
        PinRole::EventXor,
        PinRole::TimePulse,
        PinRole::AdcReady,
        PinRole::TdcInterrupt,
    ];

    /// Snake-case name used in config files and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventAnd => "event_and",
            Self::EventXor => "event_xor",
            Self::TimePulse => "time_pulse",
            Self::AdcReady => "adc_ready",
            Self::TdcInterrupt => "tdc_interrupt",
        }
    }
}

/// BCM pin numbers per logical role. `None` leaves a role unwired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinAssignments {
    /// Coincidence discriminator pin.
    pub event_and: Option<u8>,
    /// XOR discriminator pin.
    pub event_xor: Option<u8>,
    /// GNSS PPS pin.
    pub time_pulse: Option<u8>,
    /// ADC ready pin.
    pub adc_ready: Option<u8>,
    /// TDC interrupt pin.
    pub tdc_interrupt: Option<u8>,
}

impl Default for PinAssignments {
    fn default() -> Self {
        Self {
            event_and: Some(5),
            event_xor: Some(6),
            time_pulse: Some(18),
            adc_ready: Some(17),
            tdc_interrupt: Some(20),
        }
    }
}

impl PinAssignments {
    /// Pin assigned to `role`, if wired.
    #[must_use]
    pub fn pin(&self, role: PinRole) -> Option<u8> {
        match role {
            PinRole::EventAnd => self.event_and,
            PinRole::EventXor => self.event_xor,
            PinRole::TimePulse => self.time_pulse,
            PinRole::AdcReady => self.adc_ready,
            PinRole::TdcInterrupt => self.tdc_interrupt,
        }
    }

    /// All wired (role, pin) pairs.
    #[must_use]
    pub fn assignments(&self) -> Vec<(PinRole, u8)> {
        PinRole::ALL
            .iter()
            .filter_map(|&role| self.pin(role).map(|pin| (role, pin)))
            .collect()
    }
}

/// pigpiod socket backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PigpiodConfig {
    /// pigpiod address (host:port).
    pub address: String,

    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for PigpiodConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8888"),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Simulated backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Spacing of self-generated pulses on the sampling-trigger pin.
    #[serde(with = "humantime_serde")]
    pub pulse_interval: Duration,

    /// Simulated tick-rate error relative to wall time, in parts per
    /// million. Positive values make the virtual counter run fast.
    pub tick_drift_ppm: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_millis(250),
            tick_drift_ppm: 0.0,
        }
    }
}

/// Sampling-trigger gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Minimum wall-clock spacing between accepted sampling triggers.
    #[serde(with = "humantime_serde")]
    pub deadtime: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            deadtime: Duration::from_millis(8),
        }
    }
}

/// Clock measurement and regression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Spacing of tick-versus-wall-clock measurements.
    #[serde(with = "humantime_serde")]
    pub measurement_interval: Duration,

    /// Regression ring buffer capacity (samples).
    pub buffer_size: usize,

    /// Maximum allowed deviation between a synthesized timestamp and the
    /// system clock before the time pulse is rejected.
    #[serde(with = "humantime_serde")]
    pub sanity_bound: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            measurement_interval: Duration::from_millis(100),
            buffer_size: 500,
            sanity_bound: Duration::from_secs(3600),
        }
    }
}

/// Real-time scheduling configuration for the calibration thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr", or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU cores to pin to; `None` lets the OS choose.
    pub cpu_affinity: Option<Vec<usize>>,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 50,
            cpu_affinity: None,
            lock_memory: true,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: first-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: round-robin real-time.
    Rr,
    /// SCHED_OTHER: normal time-sharing (non-RT).
    Other,
}

/// Diagnostics reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Enable periodic diagnostics logging.
    pub enabled: bool,

    /// Spacing of periodic diagnostics log lines.
    #[serde(with = "humantime_serde")]
    pub log_interval: Duration,

    /// Window over which event rates are computed.
    #[serde(with = "humantime_serde")]
    pub rate_window: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_interval: Duration::from_secs(60),
            rate_window: Duration::from_secs(60),
        }
    }
}

impl StationConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field invariants the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.buffer_size < 3 {
            return Err(ConfigError::Invalid(format!(
                "clock.buffer_size must be at least 3 (regression needs 3 samples), got {}",
                self.clock.buffer_size
            )));
        }
        if self.clock.measurement_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "clock.measurement_interval must be non-zero".into(),
            ));
        }
        if self.clock.sanity_bound.is_zero() {
            return Err(ConfigError::Invalid(
                "clock.sanity_bound must be non-zero".into(),
            ));
        }
        if self.gpio.pileup_window_ticks == 0 {
            return Err(ConfigError::Invalid(
                "gpio.pileup_window_ticks must be non-zero".into(),
            ));
        }

        let assignments = self.gpio.pins.assignments();
        if assignments.is_empty() {
            return Err(ConfigError::Invalid("gpio.pins has no wired roles".into()));
        }
        for (i, &(role_a, pin_a)) in assignments.iter().enumerate() {
            for &(role_b, pin_b) in &assignments[i + 1..] {
                if pin_a == pin_b {
                    return Err(ConfigError::Invalid(format!(
                        "gpio.pins assigns BCM {} to both {} and {}",
                        pin_a,
                        role_a.as_str(),
                        role_b.as_str()
                    )));
                }
            }
        }
        if self.gpio.pins.pin(self.gpio.sampling_trigger).is_none() {
            return Err(ConfigError::Invalid(format!(
                "gpio.sampling_trigger role {} is not wired in gpio.pins",
                self.gpio.sampling_trigger.as_str()
            )));
        }

        if self.realtime.enabled
            && self.realtime.policy != SchedPolicy::Other
            && !(1..=99).contains(&self.realtime.priority)
        {
            return Err(ConfigError::Invalid(format!(
                "realtime.priority must be 1-99 for RT policies, got {}",
                self.realtime.priority
            )));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A cross-field invariant was violated.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
