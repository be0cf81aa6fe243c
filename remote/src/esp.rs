//! Firmware build for the ESP32-C6 remote: boot mode selection off the wake
//! button, the physical one-shot flow, and the interactive access-point
//! session. Every path here ends in deep sleep.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AccessPointConfiguration, AuthMethod, Configuration},
};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals, spi::SPI2},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use relayfob_common::{
    press_command, press_registered, select_boot_mode, send_command, ApConfig, BootMode, Clock,
    Command, LinkParams, MonotonicClock, PulsePattern, Session, IDLE_SLEEP_TIMEOUT_MS,
};

use crate::radio::Sx1278Radio;

/// Wake button, active low behind the internal pull-up. Must be an
/// LP-domain pin so it can wake the chip from deep sleep.
const BUTTON_GPIO: i32 = 2;
/// Status lamp, active low.
const STATUS_LED_GPIO: i32 = 15;

const HTTP_SERVER_STACK_SIZE: usize = 16 * 1024;
const IDLE_POLL_INTERVAL_MS: u64 = 500;
const BATTERY_PLACEHOLDER: &str = "NOT WIRED";

const INDEX_HTML: &str = include_str!("../web/index.html");

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    // Origin of every elapsed-since-boot reading the thresholds use.
    let clock = Arc::new(MonotonicClock::new());

    let peripherals = Peripherals::take().context("failed to take peripherals")?;

    let mut led = StatusLed::new(STATUS_LED_GPIO)?;
    let mut button = unsafe { PinDriver::input(AnyIOPin::new(BUTTON_GPIO)) }
        .context("failed to claim the wake button")?;
    button.set_pull(Pull::Up)?;

    let mode = select_boot_mode(clock.as_ref(), 0, || button.is_low());
    info!("boot mode: {}", mode.as_str());
    // Keep the pull-up configured until deep sleep re-arms the pin.
    let _button = button;

    match mode {
        BootMode::Interactive => run_interactive(clock, led, peripherals.modem, peripherals.spi2),
        BootMode::Physical => run_physical(clock.as_ref(), &mut led, peripherals.spi2),
    }
}

/// One-shot flow: a registered press brings the radio up, sends the command
/// the hold duration selects, reports on the lamp, and sleeps.
fn run_physical(clock: &MonotonicClock, led: &mut StatusLed, spi2: SPI2) -> ! {
    let elapsed_ms = clock.now_ms();
    if !press_registered(elapsed_ms) {
        info!("wake of {elapsed_ms} ms is below the press floor; nothing to send");
        enter_deep_sleep(None);
    }

    let params = LinkParams::default();
    let mut radio = match Sx1278Radio::new(spi2, &params) {
        Ok(radio) => radio,
        Err(err) => {
            warn!("link configuration failed: {err:#}");
            led.pulse(PulsePattern::LINK_FAULT);
            enter_deep_sleep(None);
        }
    };

    // Second elapsed reading, taken after link setup: radio bring-up time
    // counts toward the hold the off threshold sees.
    let command = press_command(clock.now_ms());
    info!("hold selects {}", command.as_str());

    let outcome = send_command(&mut radio, clock, command);
    match &outcome {
        Ok(ack) => info!("relay acknowledged {:?}", ack.relay),
        Err(err) => warn!("{err}"),
    }
    led.pulse(PulsePattern::for_outcome(&outcome));

    enter_deep_sleep(Some(&mut radio));
}

/// Resident flow: radio, access point, front-end, one status refresh, then
/// serve until the idle timeout closes the session.
fn run_interactive(clock: Arc<MonotonicClock>, mut led: StatusLed, modem: Modem, spi2: SPI2) -> ! {
    led.pulse(PulsePattern::SESSION_OPEN);

    let params = LinkParams::default();
    let radio = match Sx1278Radio::new(spi2, &params) {
        Ok(radio) => radio,
        Err(err) => {
            warn!("link configuration failed: {err:#}");
            led.pulse(PulsePattern::LINK_FAULT);
            enter_deep_sleep(None);
        }
    };

    let wifi = match start_access_point(modem) {
        Ok(wifi) => wifi,
        Err(err) => {
            warn!("access point startup failed: {err:#}");
            let mut radio = radio;
            enter_deep_sleep(Some(&mut radio));
        }
    };

    let state = SharedState {
        radio: Arc::new(Mutex::new(radio)),
        session: Arc::new(Mutex::new(Session::new(clock.now_ms()))),
        led: Arc::new(Mutex::new(led)),
        clock,
    };

    let server = match create_http_server(state.clone()) {
        Ok(server) => server,
        Err(err) => {
            warn!("front-end startup failed: {err:#}");
            state.radio.lock().unwrap().sleep();
            drop(wifi);
            enter_deep_sleep(None);
        }
    };

    // Front-end is up; one refresh so the first page load shows live state.
    dispatch_command(&state, Command::GetStatus);
    touch(&state);

    loop {
        thread::sleep(Duration::from_millis(IDLE_POLL_INTERVAL_MS));
        let now = state.clock.now_ms();
        if state.session.lock().unwrap().idle_expired(now) {
            break;
        }
    }

    info!("no front-end activity for {IDLE_SLEEP_TIMEOUT_MS} ms; closing the session");
    drop(server);
    state.radio.lock().unwrap().sleep();
    drop(wifi);
    enter_deep_sleep(None);
}

#[derive(Clone)]
struct SharedState {
    radio: Arc<Mutex<Sx1278Radio<'static>>>,
    session: Arc<Mutex<Session>>,
    led: Arc<Mutex<StatusLed>>,
    clock: Arc<MonotonicClock>,
}

/// One exchange end to end: radio (serialized by its mutex), session
/// update, lamp pattern, log line.
fn dispatch_command(state: &SharedState, command: Command) {
    let outcome = {
        let mut radio = state.radio.lock().unwrap();
        send_command(&mut *radio, state.clock.as_ref(), command)
    };
    state.session.lock().unwrap().record_outcome(&outcome);
    state
        .led
        .lock()
        .unwrap()
        .pulse(PulsePattern::for_outcome(&outcome));
    match outcome {
        Ok(ack) => info!("{} acknowledged, relay {:?}", command.as_str(), ack.relay),
        Err(err) => warn!("{} failed: {err}", command.as_str()),
    }
}

fn touch(state: &SharedState) {
    let now = state.clock.now_ms();
    state.session.lock().unwrap().touch(now);
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: HTTP_SERVER_STACK_SIZE,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            let status = state.session.lock().unwrap().status();
            touch(&state);
            let page = render_index(status.as_str(), BATTERY_PLACEHOLDER);
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "text/html; charset=utf-8")],
            )?
            .write_all(page.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/on", Method::Get, move |req| {
            dispatch_command(&state, Command::RelayOn);
            touch(&state);
            redirect_home(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/off", Method::Get, move |req| {
            dispatch_command(&state, Command::RelayOff);
            touch(&state);
            redirect_home(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/status", Method::Get, move |req| {
            dispatch_command(&state, Command::GetStatus);
            touch(&state);
            redirect_home(req)
        })?;
    }

    Ok(server)
}

/// Redirect-after-command keeps a page refresh from re-firing the exchange.
fn redirect_home(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection<'_>>,
) -> anyhow::Result<()> {
    req.into_response(303, Some("See Other"), &[("Location", "/")])?;
    Ok(())
}

fn render_index(status: &str, battery: &str) -> String {
    INDEX_HTML
        .replace("%STATUS%", status)
        .replace("%BATTERY%", battery)
}

fn start_access_point(modem: Modem) -> anyhow::Result<EspWifi<'static>> {
    let ap = ApConfig::default();
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: ap
            .ssid
            .try_into()
            .map_err(|_| anyhow!("access point SSID too long"))?,
        password: ap
            .passphrase
            .try_into()
            .map_err(|_| anyhow!("access point passphrase too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("access point `{}` up", ap.ssid);

    Ok(esp_wifi)
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusLed {
    fn new(gpio: i32) -> anyhow::Result<Self> {
        let mut pin = unsafe { PinDriver::output(AnyOutputPin::new(gpio)) }
            .context("failed to claim the status lamp")?;
        // Lamp is active low; park it off.
        pin.set_high()?;
        Ok(Self { pin })
    }

    fn pulse(&mut self, pattern: PulsePattern) {
        for _ in 0..pattern.count {
            let _ = self.pin.set_low();
            thread::sleep(Duration::from_millis(pattern.period_ms));
            let _ = self.pin.set_high();
            thread::sleep(Duration::from_millis(pattern.period_ms));
        }
    }
}

/// Powers the transceiver down when one is up, arms the button as the wake
/// source, and enters deep sleep. Does not return; the next press restarts
/// the firmware from the top.
fn enter_deep_sleep(radio: Option<&mut Sx1278Radio<'static>>) -> ! {
    if let Some(radio) = radio {
        radio.sleep();
    }
    info!("arming wake on GPIO{BUTTON_GPIO} low; entering deep sleep");
    unsafe {
        esp_idf_svc::sys::esp_deep_sleep_enable_gpio_wakeup(
            1_u64 << BUTTON_GPIO,
            esp_idf_svc::sys::esp_deepsleep_gpio_wake_up_mode_t_ESP_GPIO_WAKEUP_GPIO_LOW,
        );
        esp_idf_svc::sys::esp_deep_sleep_start();
    }
    unreachable!("deep sleep does not return");
}
