//! Host build: the same engine and front-end as the firmware, run against a
//! simulated peer relay. Deep sleep is modeled as a process exit.
//!
//! Knobs: `REMOTE_HTTP_PORT`, `REMOTE_SIM_PEER=silent` (never acknowledge),
//! `REMOTE_SIM_PEER_DELAY_MS` (reply airtime), `REMOTE_SIM_PRESS_MS`
//! (simulate the boot button hold; unset goes straight to the front-end).

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    extract::State,
    response::{Html, Redirect},
    routing::get,
    Router,
};
use tokio::{net::TcpListener, sync::Mutex, task};
use tracing::{info, warn};

use relayfob_common::{
    press_command, press_registered, select_boot_mode, send_command, BootMode, Clock, Command,
    Frame, MonotonicClock, PulsePattern, RadioLink, RelayState, RxPoll, Session, DEVICE_ID,
    FRAME_LEN, IDLE_SLEEP_TIMEOUT_MS,
};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_PEER_DELAY_MS: u64 = 350;
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const BATTERY_PLACEHOLDER: &str = "NOT WIRED";

const INDEX_HTML: &str = include_str!("../web/index.html");

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let clock = Arc::new(MonotonicClock::new());

    let mode = match env_u64("REMOTE_SIM_PRESS_MS") {
        Some(press_ms) => {
            let selector_clock = Arc::clone(&clock);
            task::spawn_blocking(move || {
                select_boot_mode(selector_clock.as_ref(), 0, || {
                    selector_clock.now_ms() < press_ms
                })
            })
            .await?
        }
        // No simulated press: straight to the front-end.
        None => BootMode::Interactive,
    };
    info!("boot mode: {}", mode.as_str());

    match mode {
        BootMode::Physical => {
            let flow_clock = Arc::clone(&clock);
            task::spawn_blocking(move || run_press_flow(flow_clock)).await?
        }
        BootMode::Interactive => run_interactive(clock).await,
    }
}

/// Physical-mode flow: press floor, command from hold duration, one
/// exchange, lamp pattern in the log, then "sleep".
fn run_press_flow(clock: Arc<MonotonicClock>) -> anyhow::Result<()> {
    let elapsed_ms = clock.now_ms();
    if !press_registered(elapsed_ms) {
        info!("wake of {elapsed_ms} ms is below the press floor; nothing sent");
        info!("entering deep sleep (simulated: exiting)");
        return Ok(());
    }

    let mut link = SimLink::from_env();
    let command = press_command(clock.now_ms());
    info!("hold selects {}", command.as_str());

    let outcome = send_command(&mut link, clock.as_ref(), command);
    let pattern = PulsePattern::for_outcome(&outcome);
    match outcome {
        Ok(ack) => info!(
            "relay acknowledged {:?}; lamp {}x{}ms",
            ack.relay, pattern.count, pattern.period_ms
        ),
        Err(err) => warn!("{err}; lamp {}x{}ms", pattern.count, pattern.period_ms),
    }
    info!("entering deep sleep (simulated: exiting)");
    Ok(())
}

async fn run_interactive(clock: Arc<MonotonicClock>) -> anyhow::Result<()> {
    let state = AppState {
        radio: Arc::new(Mutex::new(SimLink::from_env())),
        session: Arc::new(Mutex::new(Session::new(clock.now_ms()))),
        clock,
    };

    let port = env_u64("REMOTE_HTTP_PORT")
        .and_then(|value| u16::try_from(value).ok())
        .unwrap_or(DEFAULT_HTTP_PORT);

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/on", get(handle_relay_on))
        .route("/off", get(handle_relay_off))
        .route("/status", get(handle_status_refresh))
        .with_state(state.clone());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind front-end on port {port}"))?;
    info!("front-end listening on http://0.0.0.0:{port}");

    // Same order as the device: front-end up, one status refresh, then serve.
    dispatch(&state, Command::GetStatus).await;
    touch(&state).await;
    spawn_idle_watchdog(state.clone());

    axum::serve(listener, app)
        .await
        .context("front-end server failed")?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    radio: Arc<Mutex<SimLink>>,
    session: Arc<Mutex<Session>>,
    clock: Arc<MonotonicClock>,
}

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    let status = state.session.lock().await.status();
    touch(&state).await;
    Html(render_index(status.as_str(), BATTERY_PLACEHOLDER))
}

async fn handle_relay_on(State(state): State<AppState>) -> Redirect {
    dispatch(&state, Command::RelayOn).await;
    touch(&state).await;
    Redirect::to("/")
}

async fn handle_relay_off(State(state): State<AppState>) -> Redirect {
    dispatch(&state, Command::RelayOff).await;
    touch(&state).await;
    Redirect::to("/")
}

async fn handle_status_refresh(State(state): State<AppState>) -> Redirect {
    dispatch(&state, Command::GetStatus).await;
    touch(&state).await;
    Redirect::to("/")
}

/// Runs one blocking exchange off the async runtime and records the outcome
/// in the session. The radio mutex serializes exchanges.
async fn dispatch(state: &AppState, command: Command) {
    let radio = Arc::clone(&state.radio);
    let session = Arc::clone(&state.session);
    let clock = Arc::clone(&state.clock);

    let joined = task::spawn_blocking(move || {
        let mut link = radio.blocking_lock();
        let outcome = send_command(&mut *link, clock.as_ref(), command);
        session.blocking_lock().record_outcome(&outcome);
        outcome
    })
    .await;

    match joined {
        Ok(outcome) => {
            let pattern = PulsePattern::for_outcome(&outcome);
            match outcome {
                Ok(ack) => info!(
                    "{} acknowledged, relay {:?}; lamp {}x{}ms",
                    command.as_str(),
                    ack.relay,
                    pattern.count,
                    pattern.period_ms
                ),
                Err(err) => warn!(
                    "{} failed: {err}; lamp {}x{}ms",
                    command.as_str(),
                    pattern.count,
                    pattern.period_ms
                ),
            }
        }
        Err(err) => warn!("command task failed: {err}"),
    }
}

async fn touch(state: &AppState) {
    let now = state.clock.now_ms();
    state.session.lock().await.touch(now);
}

fn spawn_idle_watchdog(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(IDLE_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let now = state.clock.now_ms();
            if state.session.lock().await.idle_expired(now) {
                info!("no front-end activity for {IDLE_SLEEP_TIMEOUT_MS} ms");
                info!("entering deep sleep (simulated: exiting)");
                std::process::exit(0);
            }
        }
    });
}

fn render_index(status: &str, battery: &str) -> String {
    INDEX_HTML
        .replace("%STATUS%", status)
        .replace("%BATTERY%", battery)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// In-process stand-in for the relay unit. A valid command frame flips or
/// reads the relay and schedules the matching acknowledgement after the
/// configured airtime; everything else is ignored.
struct SimLink {
    mode: PeerMode,
    reply_delay: Duration,
    relay_on: bool,
    pending: Option<(Instant, Vec<u8>)>,
}

#[derive(Debug, Clone, Copy)]
enum PeerMode {
    Acknowledge,
    Silent,
}

impl SimLink {
    fn from_env() -> Self {
        let mode = match std::env::var("REMOTE_SIM_PEER").as_deref() {
            Ok("silent") => PeerMode::Silent,
            _ => PeerMode::Acknowledge,
        };
        let reply_delay = Duration::from_millis(
            env_u64("REMOTE_SIM_PEER_DELAY_MS").unwrap_or(DEFAULT_PEER_DELAY_MS),
        );
        info!(
            "simulated link ready (peer {:?}, reply delay {} ms)",
            mode,
            reply_delay.as_millis()
        );
        Self {
            mode,
            reply_delay,
            relay_on: false,
            pending: None,
        }
    }
}

impl RadioLink for SimLink {
    fn transmit(&mut self, frame: &[u8; FRAME_LEN]) {
        let Some(parsed) = Frame::parse(frame) else {
            return;
        };
        if parsed.device_id != DEVICE_ID {
            return;
        }
        let Some(command) = parsed.as_command() else {
            return;
        };
        match command {
            Command::RelayOn => self.relay_on = true,
            Command::RelayOff => self.relay_on = false,
            Command::GetStatus => {}
        }
        if matches!(self.mode, PeerMode::Silent) {
            info!("sim peer swallowing {}", command.as_str());
            return;
        }
        let relay = if self.relay_on {
            RelayState::On
        } else {
            RelayState::Off
        };
        // The second burst frame lands here too and re-arms the same reply.
        let reply = Frame::for_ack(relay).encode().to_vec();
        self.pending = Some((Instant::now() + self.reply_delay, reply));
    }

    fn try_receive(&mut self) -> RxPoll {
        if let Some((ready_at, payload)) = self.pending.take() {
            if Instant::now() >= ready_at {
                return RxPoll::Received(payload);
            }
            self.pending = Some((ready_at, payload));
        }
        RxPoll::Empty
    }
}
