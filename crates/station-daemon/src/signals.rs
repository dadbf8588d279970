//! Signal handling for the station daemon.
//!
//! SIGINT and SIGTERM request a graceful shutdown, SIGHUP dumps a
//! diagnostics snapshot to the log, and SIGUSR1 toggles the inhibit
//! flag. The actual handlers are async-signal-safe: they only store to
//! static atomics. The supervision loop consumes the flags through
//! [`SignalHandler::poll`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static DIAGNOSTICS_FLAG: AtomicBool = AtomicBool::new(false);
static INHIBIT_TOGGLE_FLAG: AtomicBool = AtomicBool::new(false);
static LAST_SIGNO: AtomicU32 = AtomicU32::new(0);

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT - interrupt (Ctrl+C).
    Interrupt,
    /// SIGTERM - graceful termination request.
    Terminate,
    /// SIGHUP - diagnostics snapshot dump.
    Hangup,
    /// SIGUSR1 - toggle the inhibit flag.
    User1,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
            SignalKind::User1 => write!(f, "SIGUSR1"),
        }
    }
}

/// Requests observed by one call to [`SignalHandler::poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalPoll {
    /// Shutdown has been requested (sticky once set).
    pub shutdown: bool,
    /// A diagnostics dump was requested since the last poll.
    pub dump_diagnostics: bool,
    /// An inhibit toggle was requested since the last poll.
    pub toggle_inhibit: bool,
}

/// Shared state between the signal flags and the supervision loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalState {
    /// True once any shutdown request has been seen.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown from any thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Total signals consumed so far.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    fn record(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Installs the handlers and exposes the poll interface.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Install handlers for SIGINT, SIGTERM, SIGHUP, and SIGUSR1.
    ///
    /// On non-Unix platforms only manual shutdown requests work.
    pub fn install() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::default()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers();

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) {
        use std::os::raw::c_int;

        extern "C" fn handle_shutdown(signo: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
            LAST_SIGNO.store(signo as u32, Ordering::Relaxed);
        }

        extern "C" fn handle_hangup(signo: c_int) {
            DIAGNOSTICS_FLAG.store(true, Ordering::Relaxed);
            LAST_SIGNO.store(signo as u32, Ordering::Relaxed);
        }

        extern "C" fn handle_user1(signo: c_int) {
            INHIBIT_TOGGLE_FLAG.store(true, Ordering::Relaxed);
            LAST_SIGNO.store(signo as u32, Ordering::Relaxed);
        }

        unsafe {
            libc::signal(libc::SIGINT, handle_shutdown as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handle_shutdown as libc::sighandler_t);
            libc::signal(libc::SIGHUP, handle_hangup as libc::sighandler_t);
            libc::signal(libc::SIGUSR1, handle_user1 as libc::sighandler_t);
        }

        debug!("Unix signal handlers registered");
    }

    /// Consume pending signal flags and fold them into the shared state.
    pub fn poll(&self) -> SignalPoll {
        if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
            self.state.record();
            match last_signal() {
                Some(kind) => info!(signal = %kind, "Shutdown signal received"),
                None => info!("Shutdown signal received"),
            }
            self.state.request_shutdown();
        }

        let dump_diagnostics = DIAGNOSTICS_FLAG.swap(false, Ordering::Relaxed);
        if dump_diagnostics {
            self.state.record();
            info!("Diagnostics dump requested");
        }

        let toggle_inhibit = INHIBIT_TOGGLE_FLAG.swap(false, Ordering::Relaxed);
        if toggle_inhibit {
            self.state.record();
            info!("Inhibit toggle requested");
        }

        SignalPoll {
            shutdown: self.state.shutdown_requested(),
            dump_diagnostics,
            toggle_inhibit,
        }
    }

    /// True once any shutdown request has been seen.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Manually request shutdown (duration bound, fatal errors).
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.state.request_shutdown();
    }

    /// Shared state for diagnostics.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

fn last_signal() -> Option<SignalKind> {
    #[cfg(unix)]
    {
        match LAST_SIGNO.load(Ordering::Relaxed) as libc::c_int {
            libc::SIGINT => Some(SignalKind::Interrupt),
            libc::SIGTERM => Some(SignalKind::Terminate),
            libc::SIGHUP => Some(SignalKind::Hangup),
            libc::SIGUSR1 => Some(SignalKind::User1),
            _ => None,
        }
    }
    #[cfg(not(unix))]
    {
        None
    }
}
