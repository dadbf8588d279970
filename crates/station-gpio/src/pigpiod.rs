//! pigpiod socket backend.
//!
//! Talks the pigpiod wire protocol directly over TCP: a command
//! connection for configuration and tick reads, and a second
//! connection converted into a notification pipe that streams level
//! reports. Edges are recovered by diffing consecutive level words
//! against the watch mask, so a single report can yield several edges
//! with the same hardware tick.
//!
//! Requests are four little-endian u32 words (command, p1, p2, p3);
//! responses echo the first three and carry the result in the fourth.
//! Notification reports are 12 bytes: seqno u16, flags u16, tick u32,
//! level u32.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use station_common::config::{GpioConfig, PigpiodConfig};
use station_common::error::{StationError, StationResult};
use station_timing::calibrate::TickSource;

use crate::pins::{PinMap, PullMode};
use crate::{EdgeEvent, EdgeHandler, EdgePolarity, GpioDriver};

/// pigpiod command numbers used by this backend.
mod cmd {
    /// Set GPIO mode.
    pub const MODES: u32 = 0;
    /// Set pull-up/down.
    pub const PUD: u32 = 2;
    /// Read levels of bank 1 (GPIO 0-31).
    pub const BR1: u32 = 10;
    /// Read the microsecond tick counter.
    pub const TICK: u32 = 16;
    /// Begin notifications on a handle.
    pub const NB: u32 = 19;
    /// Close a notification handle.
    pub const NC: u32 = 21;
    /// Convert this connection into a notification pipe.
    pub const NOIB: u32 = 99;
}

const PI_INPUT: u32 = 0;
const PI_PUD_OFF: u32 = 0;
const PI_PUD_DOWN: u32 = 1;
const PI_PUD_UP: u32 = 2;

/// Poll interval on the notification socket so `stop` is honored.
const NOTIFY_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Connection lifecycle of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No sockets open.
    Disconnected,
    /// Command socket open, pins configured.
    Configured,
    /// Notification pipe streaming reports.
    Notifying,
    /// Shut down.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Configured => "configured",
            Self::Notifying => "notifying",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Counters for the notification stream.
#[derive(Debug, Default)]
pub struct NotifyStats {
    /// Reports decoded from the pipe.
    pub reports: AtomicU64,
    /// Flagged reports (keepalive or watchdog) skipped.
    pub keepalives: AtomicU64,
    /// Edges delivered to the handler.
    pub edges: AtomicU64,
    /// Sequence-number gaps, each one a window of lost reports.
    pub sequence_gaps: AtomicU64,
}

impl NotifyStats {
    fn record_report(&self) {
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    fn record_keepalive(&self) {
        self.keepalives.fetch_add(1, Ordering::Relaxed);
    }

    fn record_edge(&self) {
        self.edges.fetch_add(1, Ordering::Relaxed);
    }

    fn record_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }
}

/// One decoded notification report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioReport {
    /// Wrapping report sequence number.
    pub seqno: u16,
    /// Nonzero for keepalive and watchdog reports.
    pub flags: u16,
    /// Hardware tick when the levels were sampled.
    pub tick: u32,
    /// Level word for GPIO 0-31.
    pub level: u32,
}

fn encode_request(command: u32, p1: u32, p2: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..4].copy_from_slice(&command.to_le_bytes());
    buf[4..8].copy_from_slice(&p1.to_le_bytes());
    buf[8..12].copy_from_slice(&p2.to_le_bytes());
    // p3 is unused by every command this backend sends
    buf
}

fn response_word(buf: &[u8; 16]) -> u32 {
    u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]])
}

fn decode_report(buf: &[u8; 12]) -> GpioReport {
    GpioReport {
        seqno: u16::from_le_bytes([buf[0], buf[1]]),
        flags: u16::from_le_bytes([buf[2], buf[3]]),
        tick: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        level: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
    }
}

fn seqno_gap(prev: u16, next: u16) -> bool {
    next != prev.wrapping_add(1)
}

fn pud_value(pull: PullMode) -> u32 {
    match pull {
        PullMode::Off => PI_PUD_OFF,
        PullMode::Down => PI_PUD_DOWN,
        PullMode::Up => PI_PUD_UP,
    }
}

/// Edges implied by a level transition, restricted to watched pins
/// whose configured polarity matches the transition direction.
fn extract_edges(prev_level: u32, level: u32, tick: u32, pins: &PinMap) -> Vec<EdgeEvent> {
    let changed = (prev_level ^ level) & pins.notify_mask();
    let mut edges = Vec::new();
    if changed == 0 {
        return edges;
    }
    for watched in pins.watched() {
        if watched.gpio >= 32 {
            continue;
        }
        let bit = 1u32 << watched.gpio;
        if changed & bit == 0 {
            continue;
        }
        let polarity = if level & bit != 0 {
            EdgePolarity::Rising
        } else {
            EdgePolarity::Falling
        };
        if polarity == watched.polarity {
            edges.push(EdgeEvent {
                gpio: watched.gpio,
                polarity,
                raw_tick: tick,
            });
        }
    }
    edges
}

struct PigpiodClient {
    stream: TcpStream,
}

impl PigpiodClient {
    fn connect(address: &str, timeout: Duration) -> StationResult<Self> {
        let mut addrs = address.to_socket_addrs().map_err(|e| {
            StationError::HardwareUnavailable(format!(
                "cannot resolve pigpiod address {address}: {e}"
            ))
        })?;
        let addr = addrs.next().ok_or_else(|| {
            StationError::HardwareUnavailable(format!(
                "pigpiod address {address} resolved to nothing"
            ))
        })?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            StationError::HardwareUnavailable(format!("cannot reach pigpiod at {address}: {e}"))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| StationError::IoError(format!("set_nodelay: {e}")))?;
        Ok(Self { stream })
    }

    /// Send a request and return the raw result word.
    ///
    /// TICK and BR1 results are unsigned and must not go through the
    /// signed status check.
    fn exchange(&mut self, command: u32, p1: u32, p2: u32) -> StationResult<u32> {
        let request = encode_request(command, p1, p2);
        self.stream
            .write_all(&request)
            .map_err(|e| StationError::IoError(format!("pigpiod send: {e}")))?;
        let mut response = [0u8; 16];
        self.stream
            .read_exact(&mut response)
            .map_err(|e| StationError::IoError(format!("pigpiod receive: {e}")))?;
        Ok(response_word(&response))
    }

    /// Send a request whose result is a signed status; negative fails.
    fn command(&mut self, command: u32, p1: u32, p2: u32) -> StationResult<u32> {
        let word = self.exchange(command, p1, p2)?;
        let status = word as i32;
        if status < 0 {
            return Err(StationError::Driver(format!(
                "pigpiod command {command} failed with status {status}"
            )));
        }
        Ok(word)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> StationResult<()> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|e| StationError::IoError(format!("set read timeout: {e}")))
    }
}

fn lock_command(client: &Arc<Mutex<PigpiodClient>>) -> StationResult<MutexGuard<'_, PigpiodClient>> {
    client
        .lock()
        .map_err(|_| StationError::Driver("command socket mutex poisoned".into()))
}

struct PigpiodTickSource {
    client: Arc<Mutex<PigpiodClient>>,
}

impl TickSource for PigpiodTickSource {
    fn current_tick(&self) -> StationResult<u32> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| StationError::TickSource("command socket mutex poisoned".into()))?;
        client.exchange(cmd::TICK, 0, 0)
    }
}

/// GPIO driver speaking to a pigpiod daemon.
pub struct PigpiodGpioDriver {
    config: PigpiodConfig,
    state: ConnectionState,
    command: Option<Arc<Mutex<PigpiodClient>>>,
    notify_handle: Option<u32>,
    reader_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<NotifyStats>,
    pins: Option<PinMap>,
}

impl fmt::Debug for PigpiodGpioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PigpiodGpioDriver")
            .field("address", &self.config.address)
            .field("state", &self.state)
            .finish()
    }
}

impl PigpiodGpioDriver {
    /// Create a driver from the GPIO section of the configuration.
    #[must_use]
    pub fn new(config: &GpioConfig) -> Self {
        Self {
            config: config.pigpiod.clone().unwrap_or_default(),
            state: ConnectionState::Disconnected,
            command: None,
            notify_handle: None,
            reader_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(NotifyStats::default()),
            pins: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Shared notification counters.
    #[must_use]
    pub fn stats(&self) -> Arc<NotifyStats> {
        Arc::clone(&self.stats)
    }
}

impl GpioDriver for PigpiodGpioDriver {
    fn initialize(&mut self, pins: &PinMap) -> StationResult<()> {
        let mut client = PigpiodClient::connect(&self.config.address, self.config.connect_timeout)?;

        for watched in pins.watched() {
            client.command(cmd::MODES, u32::from(watched.gpio), PI_INPUT)?;
            client.command(cmd::PUD, u32::from(watched.gpio), pud_value(watched.pull))?;
            info!(
                gpio = watched.gpio,
                role = watched.role.as_str(),
                polarity = %watched.polarity,
                "Configured pigpiod input"
            );
        }

        info!(address = %self.config.address, "Connected to pigpiod");
        self.command = Some(Arc::new(Mutex::new(client)));
        self.pins = Some(pins.clone());
        self.state = ConnectionState::Configured;
        Ok(())
    }

    fn attach(&mut self, handler: Box<dyn EdgeHandler>) -> StationResult<()> {
        let pins = match &self.pins {
            Some(p) => p.clone(),
            None => return Err(StationError::Driver("attach before initialize".into())),
        };
        let command = match &self.command {
            Some(c) => Arc::clone(c),
            None => return Err(StationError::Driver("attach before initialize".into())),
        };

        // Seed the level word so the first report diffs cleanly
        // against the state at subscription time.
        let initial_level = lock_command(&command)?.exchange(cmd::BR1, 0, 0)?;

        let mut notify = PigpiodClient::connect(&self.config.address, self.config.connect_timeout)?;
        let handle = notify.command(cmd::NOIB, 0, 0)?;
        notify.set_read_timeout(Some(NOTIFY_READ_TIMEOUT))?;
        lock_command(&command)?.command(cmd::NB, handle, pins.notify_mask())?;

        debug!(
            handle,
            mask = format_args!("{:#010x}", pins.notify_mask()),
            "Notification pipe open"
        );

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        let reader = match thread::Builder::new()
            .name("gpio-notify".into())
            .spawn(move || {
                reader_loop(notify, handler, &pins, initial_level, &running, &stats);
            }) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(StationError::Driver(format!(
                    "failed to spawn notification reader: {e}"
                )));
            }
        };

        self.notify_handle = Some(handle);
        self.reader_handle = Some(reader);
        self.state = ConnectionState::Notifying;
        Ok(())
    }

    fn current_tick(&self) -> StationResult<u32> {
        let command = match &self.command {
            Some(c) => c,
            None => return Err(StationError::Driver("driver not initialized".into())),
        };
        lock_command(command)?.exchange(cmd::TICK, 0, 0)
    }

    fn tick_source(&self) -> StationResult<Box<dyn TickSource + Send>> {
        let command = match &self.command {
            Some(c) => Arc::clone(c),
            None => return Err(StationError::Driver("driver not initialized".into())),
        };
        Ok(Box::new(PigpiodTickSource { client: command }))
    }

    fn stop(&mut self) -> StationResult<()> {
        if self.state == ConnectionState::Stopped {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);

        if let (Some(command), Some(handle)) = (&self.command, self.notify_handle) {
            match command.lock() {
                Ok(mut client) => {
                    if let Err(e) = client.command(cmd::NC, handle, 0) {
                        warn!(error = %e, "Failed to close pigpiod notification handle");
                    }
                }
                Err(_) => warn!("Command socket mutex poisoned during shutdown"),
            }
        }

        if let Some(reader) = self.reader_handle.take() {
            if reader.join().is_err() {
                warn!("Notification reader panicked");
            }
        }

        self.notify_handle = None;
        self.state = ConnectionState::Stopped;
        info!("pigpiod driver stopped");
        Ok(())
    }

    fn is_operational(&self) -> bool {
        self.state == ConnectionState::Notifying && self.running.load(Ordering::Acquire)
    }
}

impl Drop for PigpiodGpioDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn reader_loop(
    mut notify: PigpiodClient,
    mut handler: Box<dyn EdgeHandler>,
    pins: &PinMap,
    initial_level: u32,
    running: &AtomicBool,
    stats: &NotifyStats,
) {
    debug!("Notification reader started");
    let mut buf = [0u8; 12];
    let mut filled = 0;
    let mut last_level = initial_level;
    let mut last_seqno: Option<u16> = None;

    'outer: while running.load(Ordering::Acquire) {
        // Reports may arrive split across reads; keep the partial
        // fill across timeouts so framing never slips.
        match notify.stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if running.load(Ordering::Acquire) {
                    error!("pigpiod closed the notification pipe");
                    running.store(false, Ordering::Release);
                }
                break;
            }
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    error!(error = %e, "Notification socket failed");
                    running.store(false, Ordering::Release);
                }
                break;
            }
        }
        if filled < buf.len() {
            continue;
        }
        filled = 0;

        stats.record_report();
        let report = decode_report(&buf);

        if let Some(prev) = last_seqno {
            if seqno_gap(prev, report.seqno) {
                stats.record_gap();
                warn!(
                    expected = prev.wrapping_add(1),
                    got = report.seqno,
                    "Notification reports lost"
                );
            }
        }
        last_seqno = Some(report.seqno);

        // Flagged reports (keepalive, watchdog) carry no level change.
        if report.flags != 0 {
            stats.record_keepalive();
            continue;
        }

        for edge in extract_edges(last_level, report.level, report.tick, pins) {
            stats.record_edge();
            if let Err(e) = handler.handle_edge(edge) {
                error!(error = %e, "Edge handler fault, stopping notification reader");
                running.store(false, Ordering::Release);
                break 'outer;
            }
        }
        last_level = report.level;
    }
    debug!("Notification reader stopped");
}
