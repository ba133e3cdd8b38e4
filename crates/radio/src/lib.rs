//! LoRa radio front-end for the loragate packet forwarder

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod driver;
pub mod lifecycle;
pub mod receive;
pub mod simulated;

pub use driver::{build_driver, ChipModel, RadioDriver, RxStatus, ScanStatus};
pub use lifecycle::ChipSupervisor;
pub use receive::{receive_cycle, RadioSample, RecvOutcome, TrafficStats};
pub use simulated::{Airwaves, FrameFate, SimFrame, SimulatedRadio};

/// Largest payload the SX127x family can hold in its FIFO.
pub const MAX_PACKET_LENGTH: usize = 255;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("unknown chip model `{0}`")]
    UnknownModel(String),

    #[error("carrier frequency {mhz} MHz is outside the supported range of the {model}")]
    FrequencyOutOfRange { model: ChipModel, mhz: f64 },

    #[error("unsupported spreading factor SF{0}")]
    SpreadingFactorOutOfRange(u8),

    #[error("unsupported coding rate 4/{0}")]
    CodingRateOutOfRange(u8),

    #[error("chip initialization failed, code {0}")]
    InitFailed(u16),

    #[error("chip is not initialized")]
    NotInitialized,
}

/// Immutable chip configuration snapshot, loaded once before the
/// forwarding loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipSettings {
    pub model: ChipModel,
    pub carrier_frequency_mhz: f64,
    pub bandwidth_khz: f64,
    pub spreading_factor: u8,
    /// Coding rate denominator, 4/5 through 4/8.
    pub coding_rate: u8,
    pub sync_word: u8,
    pub preamble_length: u16,
    /// Sweep every spreading factor per receive cycle instead of
    /// listening on the configured one.
    #[serde(default)]
    pub scan_all_spreading_factors: bool,
    /// GPIO line wired to the chip's reset pin, if any.
    #[serde(default)]
    pub reset_line: Option<u8>,
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: i8,
    #[serde(default = "default_current_limit")]
    pub current_limit_ma: u8,
    /// LNA gain setting; 0 selects automatic gain control.
    #[serde(default)]
    pub gain: u8,
    #[serde(default)]
    pub simulation: SimProfile,
}

fn default_tx_power() -> i8 {
    17
}

fn default_current_limit() -> u8 {
    100
}

impl Default for ChipSettings {
    fn default() -> Self {
        Self {
            model: ChipModel::Simulated,
            carrier_frequency_mhz: 868.1,
            bandwidth_khz: 125.0,
            spreading_factor: 7,
            coding_rate: 5,
            sync_word: 0x12,
            preamble_length: 8,
            scan_all_spreading_factors: false,
            reset_line: None,
            tx_power_dbm: default_tx_power(),
            current_limit_ma: default_current_limit(),
            gain: 0,
            simulation: SimProfile::default(),
        }
    }
}

/// Channel model for the simulated backend: how often a frame arrives
/// per receive window, and how often it arrives damaged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimProfile {
    #[serde(default)]
    pub arrival_probability: f32,
    #[serde(default)]
    pub corrupt_probability: f32,
}
