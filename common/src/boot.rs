//! Boot-time mode selection. Runs once per wake, before the radio exists.
//!
//! All thresholds read elapsed time from the single boot origin. In
//! physical mode the duration is read twice: once to register the press,
//! and again after link configuration to pick the command, so setup latency
//! is part of the duration the on/off threshold sees.

use crate::clock::Clock;
use crate::protocol::Command;

/// Holding the button through this much of boot selects the interactive
/// session.
pub const MODE_SELECT_WINDOW_MS: u64 = 5_000;
/// Button sampling step during the selection window.
pub const BUTTON_POLL_INTERVAL_MS: u64 = 10;
/// A wake must out-last this floor to count as a deliberate press; anything
/// shorter is a bounce or glitch and triggers no radio activity.
pub const MIN_PRESS_ELAPSED_MS: u64 = 50;
/// Presses running past this map to the off command, shorter ones to on.
pub const OFF_PRESS_THRESHOLD_MS: u64 = 1_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Interactive,
    Physical,
}

impl BootMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Physical => "physical",
        }
    }
}

/// Samples the button until it releases or the selection window elapses.
/// `pressed` reads the debounced-enough level (active low behind a pull-up);
/// an unpressed button falls straight through to physical mode.
pub fn select_boot_mode<C, B>(clock: &C, boot_start_ms: u64, mut pressed: B) -> BootMode
where
    C: Clock,
    B: FnMut() -> bool,
{
    while pressed() {
        if clock.now_ms().saturating_sub(boot_start_ms) > MODE_SELECT_WINDOW_MS {
            return BootMode::Interactive;
        }
        clock.sleep_ms(BUTTON_POLL_INTERVAL_MS);
    }
    BootMode::Physical
}

pub fn press_registered(elapsed_since_boot_ms: u64) -> bool {
    elapsed_since_boot_ms > MIN_PRESS_ELAPSED_MS
}

pub fn press_command(elapsed_since_boot_ms: u64) -> Command {
    if elapsed_since_boot_ms > OFF_PRESS_THRESHOLD_MS {
        Command::RelayOff
    } else {
        Command::RelayOn
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn full_hold_selects_interactive() {
        let clock = FakeClock::new(0);

        let mode = select_boot_mode(&clock, 0, || clock.now_ms() < 6_000);

        assert_eq!(mode, BootMode::Interactive);
        assert!(clock.now_ms() > MODE_SELECT_WINDOW_MS);
        assert!(clock.now_ms() <= MODE_SELECT_WINDOW_MS + 2 * BUTTON_POLL_INTERVAL_MS);
    }

    #[test]
    fn early_release_selects_physical() {
        let clock = FakeClock::new(0);

        let mode = select_boot_mode(&clock, 0, || clock.now_ms() < 1_000);

        assert_eq!(mode, BootMode::Physical);
        // The selector consumed roughly the hold, nothing close to the window.
        assert!(clock.now_ms() >= 1_000);
        assert!(clock.now_ms() < 1_000 + 2 * BUTTON_POLL_INTERVAL_MS);
    }

    #[test]
    fn unpressed_button_is_physical_immediately() {
        let clock = FakeClock::new(0);

        let mode = select_boot_mode(&clock, 0, || false);

        assert_eq!(mode, BootMode::Physical);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn selection_window_is_measured_from_the_given_origin() {
        let clock = FakeClock::new(10_000);

        let mode = select_boot_mode(&clock, 10_000, || clock.now_ms() < 17_000);

        assert_eq!(mode, BootMode::Interactive);
    }

    #[test]
    fn press_floor_dismisses_bounces() {
        assert!(!press_registered(0));
        assert!(!press_registered(MIN_PRESS_ELAPSED_MS));
        assert!(press_registered(MIN_PRESS_ELAPSED_MS + 1));
    }

    #[test]
    fn hold_duration_picks_the_command() {
        assert_eq!(press_command(1_000), Command::RelayOn);
        assert_eq!(press_command(OFF_PRESS_THRESHOLD_MS), Command::RelayOn);
        assert_eq!(press_command(OFF_PRESS_THRESHOLD_MS + 1), Command::RelayOff);
        assert_eq!(press_command(2_000), Command::RelayOff);
    }
}
