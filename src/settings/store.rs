//! # Persisted Settings Store
//!
//! A flat, byte-addressed image (EEPROM style) kept in a file. Five fixed
//! slots, laid out by cumulative offset:
//!
//! | Slot | Field | Type | Size |
//! |------|-------|------|------|
//! | 0 | telemetry period (ms) | u32 | 4 B |
//! | 1 | tx power | i32 | 4 B |
//! | 2 | spreading factor | i32 | 4 B |
//! | 3 | coding rate denominator | i32 | 4 B |
//! | 4 | signal bandwidth (Hz) | f32 | 4 B |
//!
//! Scalars are little-endian. A fresh image is all `0xFF`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{RadioConfig, SettingField, SignalBandwidth};
use crate::error::{LinkError, Result};

/// Size of the persisted image in bytes
pub const IMAGE_SIZE: usize = 512;

/// Value of an erased byte
const ERASED: u8 = 0xFF;

const SLOT_SIZES: [usize; 5] = [
    std::mem::size_of::<u32>(), // telemetry period
    std::mem::size_of::<i32>(), // tx power
    std::mem::size_of::<i32>(), // spreading factor
    std::mem::size_of::<i32>(), // coding rate denominator
    std::mem::size_of::<f32>(), // signal bandwidth
];

/// Slot offsets computed by cumulative size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub telemetry_period: usize,
    pub tx_power: usize,
    pub spreading_factor: usize,
    pub coding_rate: usize,
    pub signal_bandwidth: usize,
}

impl SlotLayout {
    /// Compute the offsets from the slot sizes
    pub const fn compute() -> Self {
        let mut offsets = [0usize; 5];
        let mut addr = 0;
        let mut i = 0;
        while i < SLOT_SIZES.len() {
            offsets[i] = addr;
            addr += SLOT_SIZES[i];
            i += 1;
        }

        Self {
            telemetry_period: offsets[0],
            tx_power: offsets[1],
            spreading_factor: offsets[2],
            coding_rate: offsets[3],
            signal_bandwidth: offsets[4],
        }
    }

    /// Offset of the slot backing `field`
    pub fn offset_of(&self, field: SettingField) -> usize {
        match field {
            SettingField::TelemetryPeriod => self.telemetry_period,
            SettingField::TxPower => self.tx_power,
            SettingField::SpreadingFactor => self.spreading_factor,
            SettingField::CodingRate => self.coding_rate,
            SettingField::Bandwidth => self.signal_bandwidth,
        }
    }
}

/// Layout used by every image
pub const LAYOUT: SlotLayout = SlotLayout::compute();

/// Hard-coded offset used by the telemetry-period edit path
pub const TELEMETRY_PERIOD_FIXED_OFFSET: usize = 0;

// The fixed-offset write path must land on slot 0.
const _: () = assert!(TELEMETRY_PERIOD_FIXED_OFFSET == LAYOUT.telemetry_period);
const _: () = assert!(LAYOUT.signal_bandwidth + 4 <= IMAGE_SIZE);

/// File-backed flat byte image
#[derive(Debug)]
pub struct EepromImage {
    bytes: Vec<u8>,
    path: PathBuf,
}

impl EepromImage {
    /// Open the image at `path`, creating an erased one if the file is missing
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or has the wrong size
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            info!("No settings image at {}, starting erased", path.display());
            return Ok(Self {
                bytes: vec![ERASED; IMAGE_SIZE],
                path,
            });
        }

        let bytes = fs::read(&path)?;
        if bytes.len() != IMAGE_SIZE {
            return Err(LinkError::Settings(format!(
                "{} is {} bytes, expected {}",
                path.display(),
                bytes.len(),
                IMAGE_SIZE
            )));
        }

        debug!("Loaded settings image from {}", path.display());
        Ok(Self { bytes, path })
    }

    fn slot(&self, addr: usize) -> [u8; 4] {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[addr..addr + 4]);
        raw
    }

    pub fn read_u32(&self, addr: usize) -> u32 {
        u32::from_le_bytes(self.slot(addr))
    }

    pub fn read_i32(&self, addr: usize) -> i32 {
        i32::from_le_bytes(self.slot(addr))
    }

    pub fn read_f32(&self, addr: usize) -> f32 {
        f32::from_le_bytes(self.slot(addr))
    }

    pub fn write_u32(&mut self, addr: usize, value: u32) {
        self.bytes[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, addr: usize, value: i32) {
        self.bytes[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, addr: usize, value: f32) {
        self.bytes[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Flush the whole image to its file
    pub async fn commit(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, &self.bytes).await?;
        debug!("Committed settings image to {}", self.path.display());
        Ok(())
    }
}

/// Load a radio config from the image, falling back per slot to `defaults`
///
/// Blank (erased) or out-of-range slots are replaced by the default and logged.
pub fn load_radio_config(image: &EepromImage, defaults: &RadioConfig) -> RadioConfig {
    let mut config = *defaults;

    let period = image.read_u32(LAYOUT.telemetry_period);
    if (super::TELEMETRY_PERIOD_MIN_MS..=super::TELEMETRY_PERIOD_MAX_MS).contains(&period) {
        config.telemetry_period_ms = period;
    } else {
        warn!(value = period, "Stored telemetry period invalid, using default");
    }

    let tx_power = image.read_i32(LAYOUT.tx_power);
    if (super::TX_POWER_MIN..=super::TX_POWER_MAX).contains(&tx_power) {
        config.tx_power = tx_power;
    } else {
        warn!(value = tx_power, "Stored tx power invalid, using default");
    }

    let spreading_factor = image.read_i32(LAYOUT.spreading_factor);
    if (super::SPREADING_FACTOR_MIN..=super::SPREADING_FACTOR_MAX).contains(&spreading_factor) {
        config.spreading_factor = spreading_factor;
    } else {
        warn!(value = spreading_factor, "Stored spreading factor invalid, using default");
    }

    let coding_rate = image.read_i32(LAYOUT.coding_rate);
    if (super::CODING_RATE_MIN..=super::CODING_RATE_MAX).contains(&coding_rate) {
        config.coding_rate_denominator = coding_rate;
    } else {
        warn!(value = coding_rate, "Stored coding rate invalid, using default");
    }

    let bandwidth = image.read_f32(LAYOUT.signal_bandwidth);
    match SignalBandwidth::from_hz(bandwidth) {
        Some(bw) => config.signal_bandwidth = bw,
        None => warn!(value = bandwidth, "Stored signal bandwidth invalid, using default"),
    }

    info!(
        period_ms = config.telemetry_period_ms,
        tx_power = config.tx_power,
        spreading_factor = config.spreading_factor,
        coding_rate = config.coding_rate_denominator,
        bandwidth_hz = config.signal_bandwidth.hz(),
        "Loaded radio settings"
    );

    config
}

/// Write one field of `config` into its slot and commit the image
pub async fn persist_field(image: &mut EepromImage, config: &RadioConfig, field: SettingField) -> Result<()> {
    match field {
        SettingField::TelemetryPeriod => {
            image.write_u32(TELEMETRY_PERIOD_FIXED_OFFSET, config.telemetry_period_ms)
        }
        SettingField::TxPower => image.write_i32(LAYOUT.tx_power, config.tx_power),
        SettingField::SpreadingFactor => {
            image.write_i32(LAYOUT.spreading_factor, config.spreading_factor)
        }
        SettingField::CodingRate => image.write_i32(LAYOUT.coding_rate, config.coding_rate_denominator),
        SettingField::Bandwidth => {
            image.write_f32(LAYOUT.signal_bandwidth, config.signal_bandwidth.hz())
        }
    }

    image.commit().await
}
