//! Simulated radio backend for development and tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::driver::{RadioDriver, RxStatus, ScanStatus};
use crate::{ChipSettings, RadioError, SimProfile};

const DEFAULT_RX_TIMEOUT: Duration = Duration::from_millis(100);
const SCAN_DWELL: Duration = Duration::from_millis(1);

/// What becomes of an injected frame once the driver reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFate {
    Clean,
    CorruptCrc,
    /// The preamble is visible to a scan but the payload never
    /// completes, so the following receive times out.
    LostAfterPreamble,
}

/// One in-flight transmission on the virtual channel.
#[derive(Debug, Clone)]
pub struct SimFrame {
    pub payload: Vec<u8>,
    pub spreading_factor: u8,
    pub rssi: f32,
    pub snr: f32,
    pub frequency_error: f32,
    pub fate: FrameFate,
}

impl SimFrame {
    pub fn clean(payload: Vec<u8>, spreading_factor: u8) -> Self {
        Self {
            payload,
            spreading_factor,
            rssi: -80.0,
            snr: 9.5,
            frequency_error: 0.0,
            fate: FrameFate::Clean,
        }
    }

    pub fn with_signal(mut self, rssi: f32, snr: f32) -> Self {
        self.rssi = rssi;
        self.snr = snr;
        self
    }

    pub fn with_frequency_error(mut self, hz: f32) -> Self {
        self.frequency_error = hz;
        self
    }

    pub fn with_fate(mut self, fate: FrameFate) -> Self {
        self.fate = fate;
        self
    }
}

#[derive(Debug, Default)]
struct SimState {
    frames: VecDeque<SimFrame>,
    begin_failures: u32,
    begin_calls: u32,
    reset_calls: u32,
    receive_calls: u32,
    sf_history: Vec<u8>,
}

/// Shared handle onto the virtual channel: inject traffic, script
/// bring-up failures, observe what the driver was asked to do.
#[derive(Clone)]
pub struct Airwaves {
    state: Arc<Mutex<SimState>>,
}

impl Airwaves {
    pub async fn transmit(&self, frame: SimFrame) {
        self.state.lock().await.frames.push_back(frame);
    }

    /// Make the next `n` calls to `begin` fail.
    pub async fn fail_next_begins(&self, n: u32) {
        self.state.lock().await.begin_failures = n;
    }

    pub async fn begin_calls(&self) -> u32 {
        self.state.lock().await.begin_calls
    }

    pub async fn reset_calls(&self) -> u32 {
        self.state.lock().await.reset_calls
    }

    pub async fn receive_calls(&self) -> u32 {
        self.state.lock().await.receive_calls
    }

    /// Spreading factors the driver tuned to, in order.
    pub async fn sf_history(&self) -> Vec<u8> {
        self.state.lock().await.sf_history.clone()
    }

    pub async fn is_clear(&self) -> bool {
        self.state.lock().await.frames.is_empty()
    }
}

/// In-tree [`RadioDriver`] backend driving a virtual channel instead
/// of an SPI bus.
#[derive(Debug)]
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
    profile: SimProfile,
    sf_range: std::ops::RangeInclusive<u8>,
    current_sf: u8,
    initialized: bool,
    rx_timeout: Duration,
    last_rssi: f32,
    last_snr: f32,
    last_frequency_error: f32,
    last_packet_length: usize,
}

impl SimulatedRadio {
    pub fn new(settings: &ChipSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            profile: settings.simulation,
            sf_range: settings.model.spreading_factor_range(),
            current_sf: settings.spreading_factor,
            initialized: false,
            rx_timeout: DEFAULT_RX_TIMEOUT,
            last_rssi: 0.0,
            last_snr: 0.0,
            last_frequency_error: 0.0,
            last_packet_length: 0,
        }
    }

    /// Shorten the receive window; tests use this to keep idle polls fast.
    pub fn with_rx_timeout(mut self, timeout: Duration) -> Self {
        self.rx_timeout = timeout;
        self
    }

    pub fn airwaves(&self) -> Airwaves {
        Airwaves {
            state: self.state.clone(),
        }
    }

    fn synthesize_frame(&self) -> Option<SimFrame> {
        if self.profile.arrival_probability <= 0.0 {
            return None;
        }
        let mut rng = rand::rng();
        if rng.random::<f32>() >= self.profile.arrival_probability {
            return None;
        }
        let len = rng.random_range(8usize..=32);
        let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let fate = if rng.random::<f32>() < self.profile.corrupt_probability {
            FrameFate::CorruptCrc
        } else {
            FrameFate::Clean
        };
        Some(SimFrame {
            payload,
            spreading_factor: self.current_sf,
            rssi: rng.random_range(-120.0..-50.0),
            snr: rng.random_range(-10.0..12.0),
            frequency_error: rng.random_range(-5000.0..5000.0),
            fate,
        })
    }

    fn record(&mut self, frame: &SimFrame) {
        self.last_rssi = frame.rssi;
        self.last_snr = frame.snr;
        self.last_frequency_error = frame.frequency_error;
        self.last_packet_length = frame.payload.len().min(crate::MAX_PACKET_LENGTH);
    }
}

#[async_trait]
impl RadioDriver for SimulatedRadio {
    async fn begin(&mut self, settings: &ChipSettings) -> Result<(), RadioError> {
        {
            let mut state = self.state.lock().await;
            state.begin_calls += 1;
            if state.begin_failures > 0 {
                state.begin_failures -= 1;
                return Err(RadioError::InitFailed(2));
            }
        }
        self.current_sf = settings.spreading_factor;
        self.initialized = true;
        Ok(())
    }

    async fn reset(&mut self) {
        self.initialized = false;
        self.state.lock().await.reset_calls += 1;
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<RxStatus, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        let frame = {
            let mut state = self.state.lock().await;
            state.receive_calls += 1;
            let matches = state
                .frames
                .front()
                .map(|f| f.spreading_factor == self.current_sf)
                .unwrap_or(false);
            if matches {
                state.frames.pop_front()
            } else {
                None
            }
        };
        let frame = match frame.or_else(|| self.synthesize_frame()) {
            Some(frame) => frame,
            None => {
                sleep(self.rx_timeout).await;
                return Ok(RxStatus::Timeout);
            }
        };
        match frame.fate {
            FrameFate::LostAfterPreamble => {
                sleep(self.rx_timeout).await;
                Ok(RxStatus::Timeout)
            }
            FrameFate::CorruptCrc => {
                self.record(&frame);
                Ok(RxStatus::CrcMismatch)
            }
            FrameFate::Clean => {
                self.record(&frame);
                let n = frame.payload.len().min(buf.len());
                buf[..n].copy_from_slice(&frame.payload[..n]);
                self.last_packet_length = n;
                Ok(RxStatus::Received)
            }
        }
    }

    async fn scan_channel(&mut self) -> ScanStatus {
        sleep(SCAN_DWELL).await;
        let state = self.state.lock().await;
        let active = state
            .frames
            .front()
            .map(|f| f.spreading_factor == self.current_sf)
            .unwrap_or(false);
        if active {
            ScanStatus::PreambleDetected
        } else {
            ScanStatus::ChannelFree
        }
    }

    async fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError> {
        if !self.sf_range.contains(&sf) {
            return Err(RadioError::SpreadingFactorOutOfRange(sf));
        }
        self.state.lock().await.sf_history.push(sf);
        self.current_sf = sf;
        Ok(())
    }

    fn last_rssi(&self) -> f32 {
        self.last_rssi
    }

    fn last_snr(&self) -> f32 {
        self.last_snr
    }

    fn last_frequency_error(&self) -> f32 {
        self.last_frequency_error
    }

    fn last_packet_length(&self) -> usize {
        self.last_packet_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(settings: &ChipSettings) -> SimulatedRadio {
        SimulatedRadio::new(settings).with_rx_timeout(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn scripted_begin_failures_then_success() {
        let settings = ChipSettings::default();
        let mut radio = fast(&settings);
        let air = radio.airwaves();
        air.fail_next_begins(2).await;

        assert!(radio.begin(&settings).await.is_err());
        assert!(radio.begin(&settings).await.is_err());
        assert!(radio.begin(&settings).await.is_ok());
        assert_eq!(air.begin_calls().await, 3);
    }

    #[tokio::test]
    async fn receive_before_begin_is_rejected() {
        let settings = ChipSettings::default();
        let mut radio = fast(&settings);
        let mut buf = [0u8; 8];
        assert!(matches!(
            radio.receive(&mut buf).await,
            Err(RadioError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn frame_on_another_sf_stays_queued() {
        let settings = ChipSettings::default();
        let mut radio = fast(&settings);
        let air = radio.airwaves();
        radio.begin(&settings).await.unwrap();
        air.transmit(SimFrame::clean(vec![0xAA], 9)).await;

        let mut buf = [0u8; 8];
        assert_eq!(radio.receive(&mut buf).await.unwrap(), RxStatus::Timeout);
        assert!(!air.is_clear().await);

        radio.set_spreading_factor(9).await.unwrap();
        assert_eq!(radio.receive(&mut buf).await.unwrap(), RxStatus::Received);
        assert_eq!(radio.last_packet_length(), 1);
        assert_eq!(buf[0], 0xAA);
        assert!(air.is_clear().await);
    }
}
