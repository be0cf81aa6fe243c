//! Register-level driver for the SX1276/77/78 transceiver: just enough of
//! its LoRa mode for two-byte frames. Transmit blocks on the TX-done flag;
//! receive is a non-blocking poll of the IRQ flags, which is what the
//! command channel's receive window wants.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use esp_idf_hal::{
    gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver},
    peripheral::Peripheral,
    spi::{config::Config as SpiConfig, SpiAnyPins, SpiDeviceDriver, SpiDriver, SpiDriverConfig},
    units::Hertz,
};
use log::warn;

use relayfob_common::{LinkParams, RadioLink, RxPoll, FRAME_LEN};

// Transceiver wiring on the side header.
const PIN_LORA_RST: i32 = 3;
const PIN_LORA_NSS: i32 = 18;
const PIN_LORA_SCK: i32 = 21;
const PIN_LORA_MOSI: i32 = 19;
const PIN_LORA_MISO: i32 = 20;

const SPI_BAUD_HZ: u32 = 8_000_000;

// LoRa-mode register map (SX1276/77/78/79 datasheet).
const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_OCP: u8 = 0x0B;
const REG_LNA: u8 = 0x0C;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_VERSION: u8 = 0x42;
const REG_PA_DAC: u8 = 0x4D;

const MODE_LONG_RANGE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;

const IRQ_TX_DONE: u8 = 0x08;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
const IRQ_RX_DONE: u8 = 0x40;

const PA_BOOST: u8 = 0x80;
const PA_DAC_HIGH_POWER: u8 = 0x87;
const PA_DAC_DEFAULT: u8 = 0x84;
const LNA_BOOST_HF: u8 = 0x03;

const CHIP_VERSION: u8 = 0x12;
const CRYSTAL_HZ: u64 = 32_000_000;
const RESET_PULSE_MS: u64 = 10;
// Worst case airtime at SF12/125 kHz is around a second for our frames.
const TX_DONE_TIMEOUT_MS: u64 = 2_000;

pub struct Sx1278Radio<'d> {
    spi: SpiDeviceDriver<'d, SpiDriver<'d>>,
    reset: PinDriver<'d, AnyOutputPin, Output>,
}

impl Sx1278Radio<'static> {
    /// Claims the SPI bus, resets the chip, and programs the link
    /// parameters. One shot: any failure here is fatal for the boot.
    pub fn new<S>(spi: impl Peripheral<P = S> + 'static, params: &LinkParams) -> anyhow::Result<Self>
    where
        S: SpiAnyPins,
    {
        let spi_config = SpiConfig::new()
            .baudrate(Hertz(SPI_BAUD_HZ))
            .data_mode(embedded_hal::spi::MODE_0);
        let spi = SpiDeviceDriver::new_single(
            spi,
            unsafe { AnyIOPin::new(PIN_LORA_SCK) },
            unsafe { AnyIOPin::new(PIN_LORA_MOSI) },
            Some(unsafe { AnyIOPin::new(PIN_LORA_MISO) }),
            Some(unsafe { AnyIOPin::new(PIN_LORA_NSS) }),
            &SpiDriverConfig::default(),
            &spi_config,
        )
        .context("failed to claim SPI bus for the transceiver")?;
        let reset = PinDriver::output(unsafe { AnyOutputPin::new(PIN_LORA_RST) })
            .context("failed to claim transceiver reset pin")?;

        let mut radio = Self { spi, reset };
        radio.initialize(params)?;
        Ok(radio)
    }

    fn initialize(&mut self, params: &LinkParams) -> anyhow::Result<()> {
        self.reset.set_low()?;
        thread::sleep(Duration::from_millis(RESET_PULSE_MS));
        self.reset.set_high()?;
        thread::sleep(Duration::from_millis(RESET_PULSE_MS));

        let version = self.read_register(REG_VERSION)?;
        if version != CHIP_VERSION {
            bail!("transceiver not responding (version register 0x{version:02X})");
        }

        // Mode bits only take while the modem sleeps.
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_SLEEP)?;
        self.set_frequency(params.frequency_hz)?;
        self.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;
        let lna = self.read_register(REG_LNA)?;
        self.write_register(REG_LNA, lna | LNA_BOOST_HF)?;
        self.apply_modem_config(params)?;
        self.set_tx_power(params.tx_power_dbm)?;
        self.write_register(REG_SYNC_WORD, params.sync_word)?;
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_RX_CONTINUOUS)?;
        Ok(())
    }

    fn set_frequency(&mut self, frequency_hz: u64) -> anyhow::Result<()> {
        // FRF steps are crystal / 2^19.
        let frf = (frequency_hz << 19) / CRYSTAL_HZ;
        self.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_FRF_LSB, frf as u8)?;
        Ok(())
    }

    fn apply_modem_config(&mut self, params: &LinkParams) -> anyhow::Result<()> {
        let bw_bits: u8 = match params.bandwidth_hz {
            62_500 => 0x06,
            125_000 => 0x07,
            250_000 => 0x08,
            500_000 => 0x09,
            other => bail!("unsupported bandwidth {other} Hz"),
        };
        let cr_bits = params.coding_rate.clamp(5, 8) - 4;
        // Explicit header mode (bit 0 clear).
        self.write_register(REG_MODEM_CONFIG_1, (bw_bits << 4) | (cr_bits << 1))?;

        let sf = params.spreading_factor.clamp(7, 12);
        self.write_register(REG_MODEM_CONFIG_2, sf << 4)?;
        // SF11/12 at narrow bandwidth needs the low-data-rate flag; auto AGC
        // stays on either way.
        let low_data_rate = sf >= 11 && params.bandwidth_hz <= 125_000;
        self.write_register(REG_MODEM_CONFIG_3, if low_data_rate { 0x0C } else { 0x04 })?;
        self.write_register(REG_DETECTION_OPTIMIZE, 0xC3)?;
        self.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) -> anyhow::Result<()> {
        // PA_BOOST output; +18 dBm and up needs the high-power DAC and a
        // raised current limit.
        let level = dbm.clamp(2, 20) as u8;
        if level > 17 {
            self.write_register(REG_PA_DAC, PA_DAC_HIGH_POWER)?;
            self.set_current_limit(140)?;
            self.write_register(REG_PA_CONFIG, PA_BOOST | (level - 5))?;
        } else {
            self.write_register(REG_PA_DAC, PA_DAC_DEFAULT)?;
            self.set_current_limit(100)?;
            self.write_register(REG_PA_CONFIG, PA_BOOST | (level - 2))?;
        }
        Ok(())
    }

    fn set_current_limit(&mut self, milliamps: u8) -> anyhow::Result<()> {
        let trim = if milliamps <= 120 {
            (milliamps.saturating_sub(45)) / 5
        } else {
            ((milliamps as u16 + 30) / 10) as u8
        };
        self.write_register(REG_OCP, 0x20 | (trim & 0x1F))?;
        Ok(())
    }

    /// Lowest-power chip state ahead of device deep sleep.
    pub fn sleep(&mut self) {
        if let Err(err) = self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_SLEEP) {
            warn!("failed to put transceiver to sleep: {err:#}");
        }
    }

    fn transmit_frame(&mut self, frame: &[u8; FRAME_LEN]) -> anyhow::Result<()> {
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_STDBY)?;
        self.write_register(REG_FIFO_ADDR_PTR, 0x00)?;
        for byte in frame {
            self.write_register(REG_FIFO, *byte)?;
        }
        self.write_register(REG_PAYLOAD_LENGTH, FRAME_LEN as u8)?;
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_TX)?;

        let started = Instant::now();
        loop {
            let flags = self.read_register(REG_IRQ_FLAGS)?;
            if flags & IRQ_TX_DONE != 0 {
                self.write_register(REG_IRQ_FLAGS, IRQ_TX_DONE)?;
                break;
            }
            if started.elapsed() >= Duration::from_millis(TX_DONE_TIMEOUT_MS) {
                bail!("transmit did not finish within {TX_DONE_TIMEOUT_MS} ms");
            }
            thread::sleep(Duration::from_millis(1));
        }

        self.write_register(REG_OP_MODE, MODE_LONG_RANGE | MODE_RX_CONTINUOUS)?;
        Ok(())
    }

    fn poll_frame(&mut self) -> anyhow::Result<RxPoll> {
        let flags = self.read_register(REG_IRQ_FLAGS)?;
        if flags & IRQ_RX_DONE == 0 {
            return Ok(RxPoll::Empty);
        }
        self.write_register(REG_IRQ_FLAGS, flags)?;
        if flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            return Ok(RxPoll::Empty);
        }

        let len = self.read_register(REG_RX_NB_BYTES)? as usize;
        let current = self.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, current)?;
        let mut payload = Vec::with_capacity(len);
        for _ in 0..len {
            payload.push(self.read_register(REG_FIFO)?);
        }
        Ok(RxPoll::Received(payload))
    }

    fn read_register(&mut self, address: u8) -> anyhow::Result<u8> {
        let request = [address & 0x7F, 0x00];
        let mut response = [0_u8; 2];
        self.spi
            .transfer(&mut response, &request)
            .with_context(|| format!("SPI read of register 0x{address:02X} failed"))?;
        Ok(response[1])
    }

    fn write_register(&mut self, address: u8, value: u8) -> anyhow::Result<()> {
        self.spi
            .write(&[address | 0x80, value])
            .with_context(|| format!("SPI write of register 0x{address:02X} failed"))?;
        Ok(())
    }
}

impl RadioLink for Sx1278Radio<'static> {
    fn transmit(&mut self, frame: &[u8; FRAME_LEN]) {
        if let Err(err) = self.transmit_frame(frame) {
            warn!("frame transmit failed: {err:#}");
        }
    }

    fn try_receive(&mut self) -> RxPoll {
        match self.poll_frame() {
            Ok(poll) => poll,
            Err(err) => {
                warn!("receive poll failed: {err:#}");
                RxPoll::Empty
            }
        }
    }
}
