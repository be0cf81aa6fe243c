pub mod boot;
pub mod channel;
pub mod clock;
pub mod config;
pub mod protocol;
pub mod session;
pub mod signal;

pub use boot::{press_command, press_registered, select_boot_mode, BootMode};
pub use channel::{send_command, AckTimeout, CommandOutcome, RadioLink, RxPoll};
pub use clock::{Clock, MonotonicClock};
pub use config::{ApConfig, LinkParams};
pub use protocol::{Acknowledgement, Command, Frame, RelayState, DEVICE_ID, FRAME_LEN};
pub use session::{Session, SessionStatus, IDLE_SLEEP_TIMEOUT_MS};
pub use signal::PulsePattern;
