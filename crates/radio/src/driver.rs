//! Driver seam between the forwarding engine and the radio chip

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::simulated::SimulatedRadio;
use crate::{ChipSettings, RadioError};

/// Result of one blocking receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// A packet with a valid CRC is in the driver's buffer.
    Received,
    /// A packet arrived but failed its integrity check.
    CrcMismatch,
    /// The receive window closed without a packet.
    Timeout,
}

/// Result of a short channel activity scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    PreambleDetected,
    ChannelFree,
}

/// Contract between the forwarding engine and a LoRa chip.
///
/// The receive and scan calls block internally up to the chip's own
/// timeouts; the post-receive accessors are only meaningful after
/// [`RxStatus::Received`] and before the next driver call.
#[async_trait]
pub trait RadioDriver: Send + fmt::Debug {
    /// Push the full settings snapshot to the chip.
    async fn begin(&mut self, settings: &ChipSettings) -> Result<(), RadioError>;

    /// Pulse the hardware reset line.
    async fn reset(&mut self);

    /// Listen for one packet, copying its payload into `buf`.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<RxStatus, RadioError>;

    /// Probe the current channel for preamble activity.
    async fn scan_channel(&mut self) -> ScanStatus;

    async fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError>;

    fn last_rssi(&self) -> f32;
    fn last_snr(&self) -> f32;
    fn last_frequency_error(&self) -> f32;
    fn last_packet_length(&self) -> usize;
}

/// Supported radio chip variants, resolved once at startup from
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChipModel {
    #[serde(rename = "SX1272")]
    Sx1272,
    #[serde(rename = "SX1273")]
    Sx1273,
    #[serde(rename = "SX1276")]
    Sx1276,
    #[serde(rename = "SX1277")]
    Sx1277,
    #[serde(rename = "SX1278")]
    Sx1278,
    #[serde(rename = "SX1279")]
    Sx1279,
    #[serde(rename = "RFM95")]
    Rfm95,
    #[serde(rename = "RFM96")]
    Rfm96,
    #[serde(rename = "RFM97")]
    Rfm97,
    #[serde(rename = "RFM98")]
    Rfm98,
    #[serde(rename = "SIMULATED")]
    Simulated,
}

impl ChipModel {
    /// Carrier frequencies the variant's RF front-end can tune to.
    pub fn carrier_range_mhz(self) -> RangeInclusive<f64> {
        match self {
            ChipModel::Sx1272 | ChipModel::Sx1273 => 860.0..=1020.0,
            ChipModel::Sx1276 | ChipModel::Sx1277 | ChipModel::Sx1279 => 137.0..=1020.0,
            ChipModel::Sx1278 | ChipModel::Rfm96 | ChipModel::Rfm98 => 137.0..=525.0,
            ChipModel::Rfm95 | ChipModel::Rfm97 => 862.0..=1020.0,
            ChipModel::Simulated => 137.0..=1020.0,
        }
    }

    /// Spreading factors usable for explicit-header reception; SF6
    /// requires implicit headers and is excluded.
    pub fn spreading_factor_range(self) -> RangeInclusive<u8> {
        7..=12
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipModel::Sx1272 => "SX1272",
            ChipModel::Sx1273 => "SX1273",
            ChipModel::Sx1276 => "SX1276",
            ChipModel::Sx1277 => "SX1277",
            ChipModel::Sx1278 => "SX1278",
            ChipModel::Sx1279 => "SX1279",
            ChipModel::Rfm95 => "RFM95",
            ChipModel::Rfm96 => "RFM96",
            ChipModel::Rfm97 => "RFM97",
            ChipModel::Rfm98 => "RFM98",
            ChipModel::Simulated => "SIMULATED",
        };
        f.write_str(name)
    }
}

impl FromStr for ChipModel {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SX1272" => Ok(ChipModel::Sx1272),
            "SX1273" => Ok(ChipModel::Sx1273),
            "SX1276" => Ok(ChipModel::Sx1276),
            "SX1277" => Ok(ChipModel::Sx1277),
            "SX1278" => Ok(ChipModel::Sx1278),
            "SX1279" => Ok(ChipModel::Sx1279),
            "RFM95" => Ok(ChipModel::Rfm95),
            "RFM96" => Ok(ChipModel::Rfm96),
            "RFM97" => Ok(ChipModel::Rfm97),
            "RFM98" => Ok(ChipModel::Rfm98),
            "SIMULATED" => Ok(ChipModel::Simulated),
            other => Err(RadioError::UnknownModel(other.to_string())),
        }
    }
}

/// Resolve the configured chip model and construct its driver.
///
/// Settings are validated against the variant's capability metadata
/// before the driver is built. The in-tree backend emulates the SX127x
/// family over a virtual channel; hardware SPI backends implement
/// [`RadioDriver`] against the same contract and plug in here.
pub fn build_driver(settings: &ChipSettings) -> Result<Box<dyn RadioDriver>, RadioError> {
    validate(settings)?;
    Ok(Box::new(SimulatedRadio::new(settings)))
}

fn validate(settings: &ChipSettings) -> Result<(), RadioError> {
    let model = settings.model;
    if !model
        .carrier_range_mhz()
        .contains(&settings.carrier_frequency_mhz)
    {
        return Err(RadioError::FrequencyOutOfRange {
            model,
            mhz: settings.carrier_frequency_mhz,
        });
    }
    if !model
        .spreading_factor_range()
        .contains(&settings.spreading_factor)
    {
        return Err(RadioError::SpreadingFactorOutOfRange(
            settings.spreading_factor,
        ));
    }
    if !(5..=8).contains(&settings.coding_rate) {
        return Err(RadioError::CodingRateOutOfRange(settings.coding_rate));
    }
    Ok(())
}
