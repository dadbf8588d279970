//! Runtime pin map: BCM pin numbers to logical signal roles.
//!
//! Built once from the configured pin assignments. Lookup happens on
//! every edge, so roles live in a flat array indexed by pin number.

use station_common::config::{PinAssignments, PinRole};

use crate::EdgePolarity;

/// Pull resistor applied when a pin is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// No pull resistor.
    Off,
    /// Pull-down resistor.
    Down,
    /// Pull-up resistor.
    Up,
}

/// One registered pin with its watch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchedPin {
    /// BCM pin number.
    pub gpio: u8,
    /// Logical role of the pin.
    pub role: PinRole,
    /// Edge direction the hardware watch is armed for.
    pub polarity: EdgePolarity,
    /// Pull resistor to apply at registration.
    pub pull: PullMode,
}

/// Mapping between BCM pins and signal roles.
#[derive(Clone)]
pub struct PinMap {
    roles: [Option<PinRole>; 256],
    watched: Vec<WatchedPin>,
}

impl std::fmt::Debug for PinMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinMap").field("watched", &self.watched).finish()
    }
}

impl PinMap {
    /// Build the map from configured assignments.
    ///
    /// Watch parameters follow the detector wiring: every role is armed
    /// on the rising edge except the TDC interrupt, which is active-low,
    /// and the ADC-ready line gets a pull-up.
    #[must_use]
    pub fn from_assignments(assignments: &PinAssignments) -> Self {
        let mut roles = [None; 256];
        let mut watched = Vec::new();

        for (role, gpio) in assignments.assignments() {
            roles[gpio as usize] = Some(role);
            watched.push(WatchedPin {
                gpio,
                role,
                polarity: Self::polarity_for(role),
                pull: Self::pull_for(role),
            });
        }

        Self { roles, watched }
    }

    fn polarity_for(role: PinRole) -> EdgePolarity {
        match role {
            PinRole::TdcInterrupt => EdgePolarity::Falling,
            _ => EdgePolarity::Rising,
        }
    }

    fn pull_for(role: PinRole) -> PullMode {
        match role {
            PinRole::AdcReady => PullMode::Up,
            _ => PullMode::Off,
        }
    }

    /// Role of a pin, `None` for unmapped pins.
    #[must_use]
    pub fn role_of(&self, gpio: u8) -> Option<PinRole> {
        self.roles[gpio as usize]
    }

    /// Pin wired for a role, if any.
    #[must_use]
    pub fn pin_of(&self, role: PinRole) -> Option<u8> {
        self.watched.iter().find(|w| w.role == role).map(|w| w.gpio)
    }

    /// All registered pins with their watch parameters.
    #[must_use]
    pub fn watched(&self) -> &[WatchedPin] {
        &self.watched
    }

    /// Number of registered pins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    /// True when no pins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Notification bitmask over pins 0..=31.
    ///
    /// The pigpiod notification stream only covers the first bank; the
    /// detector wiring sits entirely within it.
    #[must_use]
    pub fn notify_mask(&self) -> u32 {
        self.watched
            .iter()
            .filter(|w| w.gpio < 32)
            .fold(0, |mask, w| mask | (1 << w.gpio))
    }
}
