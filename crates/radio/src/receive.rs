//! Receive state machine: one radio poll per invocation

use log::{debug, info, warn};

use crate::driver::{RadioDriver, RxStatus, ScanStatus};
use crate::{ChipSettings, MAX_PACKET_LENGTH};

/// Signal metrics and payload of one successfully received packet.
///
/// The fields are read out immediately after the receive call returns;
/// the driver's internal buffer is not guaranteed to survive past the
/// next driver call.
#[derive(Debug, Clone)]
pub struct RadioSample {
    pub rssi: f32,
    pub snr: f32,
    pub frequency_error: f32,
    payload: [u8; MAX_PACKET_LENGTH],
    len: usize,
}

impl RadioSample {
    pub fn new(rssi: f32, snr: f32, frequency_error: f32, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PACKET_LENGTH);
        let mut buf = [0u8; MAX_PACKET_LENGTH];
        buf[..len].copy_from_slice(&payload[..len]);
        Self {
            rssi,
            snr,
            frequency_error,
            payload: buf,
            len,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

/// Packet counters for the whole process lifetime; never reset.
/// Mutated only by the thread that owns the receive loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficStats {
    pub recv_packets: u64,
    pub recv_packets_crc_good: u64,
    pub forw_packets: u64,
    pub forw_packets_crc_good: u64,
}

/// Classified outcome of one receive cycle.
#[derive(Debug)]
pub enum RecvOutcome {
    NoData,
    Data(RadioSample),
    /// A packet was lost or damaged. `insist` is set when a preamble
    /// had already been spotted, so the caller should skip its idle
    /// backoff and listen again right away.
    Failed { insist: bool },
}

/// Poll the radio once and classify the result.
///
/// In fixed-channel mode this is a single blocking receive at the
/// configured spreading factor. In scanning mode the spreading factors
/// are swept in ascending order and the first channel showing preamble
/// activity gets the blocking receive; with no activity anywhere the
/// cycle ends without one.
pub async fn receive_cycle(
    driver: &mut dyn RadioDriver,
    settings: &ChipSettings,
    stats: &mut TrafficStats,
) -> RecvOutcome {
    let mut buf = [0u8; MAX_PACKET_LENGTH];
    let mut insist = false;

    let status = if !settings.scan_all_spreading_factors {
        driver.receive(&mut buf).await
    } else {
        let mut status = Ok(RxStatus::Timeout);
        for sf in settings.model.spreading_factor_range() {
            if let Err(e) = driver.set_spreading_factor(sf).await {
                warn!("failed to tune to SF{}: {}", sf, e);
                continue;
            }
            if driver.scan_channel().await == ScanStatus::PreambleDetected {
                info!(
                    "preamble detected at SF{}, RSSI {:.1} dBm",
                    sf,
                    driver.last_rssi()
                );
                status = driver.receive(&mut buf).await;
                insist = !matches!(status, Ok(RxStatus::Received));
                break;
            }
        }
        status
    };

    match status {
        Ok(RxStatus::Received) => {
            stats.recv_packets += 1;
            stats.recv_packets_crc_good += 1;
            let len = driver.last_packet_length().min(MAX_PACKET_LENGTH);
            let sample = RadioSample::new(
                driver.last_rssi(),
                driver.last_snr(),
                driver.last_frequency_error(),
                &buf[..len],
            );
            info!(
                "received packet: RSSI {:.1} dBm, SNR {:.1} dB, frequency error {:.0} Hz, {} bytes",
                sample.rssi,
                sample.snr,
                sample.frequency_error,
                sample.payload().len()
            );
            debug!("payload: {}", hex::encode(sample.payload()));
            RecvOutcome::Data(sample)
        }
        Ok(RxStatus::CrcMismatch) => {
            stats.recv_packets += 1;
            warn!("received packet CRC error - ignored");
            RecvOutcome::Failed { insist }
        }
        Ok(RxStatus::Timeout) => {
            if insist {
                RecvOutcome::Failed { insist: true }
            } else {
                RecvOutcome::NoData
            }
        }
        Err(e) => {
            warn!("receive failed: {}", e);
            RecvOutcome::Failed { insist }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{FrameFate, SimFrame, SimulatedRadio};
    use std::time::Duration;

    fn settings(scan: bool) -> ChipSettings {
        ChipSettings {
            scan_all_spreading_factors: scan,
            ..ChipSettings::default()
        }
    }

    async fn ready_radio(settings: &ChipSettings) -> SimulatedRadio {
        let mut radio =
            SimulatedRadio::new(settings).with_rx_timeout(Duration::from_millis(1));
        radio.begin(settings).await.unwrap();
        radio
    }

    #[tokio::test]
    async fn fixed_mode_clean_receive() {
        let settings = settings(false);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(SimFrame::clean(vec![1, 2, 3], 7).with_signal(-80.0, 9.5))
            .await;

        let mut stats = TrafficStats::default();
        match receive_cycle(&mut radio, &settings, &mut stats).await {
            RecvOutcome::Data(sample) => {
                assert_eq!(sample.payload(), &[1, 2, 3]);
                assert_eq!(sample.rssi, -80.0);
                assert_eq!(sample.snr, 9.5);
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert_eq!(stats.recv_packets, 1);
        assert_eq!(stats.recv_packets_crc_good, 1);
    }

    #[tokio::test]
    async fn fixed_mode_crc_failure_counts_once() {
        let settings = settings(false);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(SimFrame::clean(vec![9; 16], 7).with_fate(FrameFate::CorruptCrc))
            .await;

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::Failed { insist: false }));
        assert_eq!(stats.recv_packets, 1);
        assert_eq!(stats.recv_packets_crc_good, 0);
    }

    #[tokio::test]
    async fn fixed_mode_timeout_is_no_data() {
        let settings = settings(false);
        let mut radio = ready_radio(&settings).await;

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::NoData));
        assert_eq!(stats.recv_packets, 0);
    }

    #[tokio::test]
    async fn zero_length_payload_is_still_data() {
        let settings = settings(false);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(SimFrame::clean(vec![], 7)).await;

        let mut stats = TrafficStats::default();
        match receive_cycle(&mut radio, &settings, &mut stats).await {
            RecvOutcome::Data(sample) => assert!(sample.payload().is_empty()),
            other => panic!("expected data, got {:?}", other),
        }
        assert_eq!(stats.recv_packets_crc_good, 1);
    }

    #[tokio::test]
    async fn scan_sweeps_ascending_and_halts_at_preamble() {
        let settings = settings(true);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(SimFrame::clean(vec![0x42], 9)).await;

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::Data(_)));
        assert_eq!(air.sf_history().await, vec![7, 8, 9]);
        assert_eq!(air.receive_calls().await, 1);
    }

    #[tokio::test]
    async fn quiet_scan_reports_no_data_without_receiving() {
        let settings = settings(true);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::NoData));
        assert_eq!(air.sf_history().await, vec![7, 8, 9, 10, 11, 12]);
        assert_eq!(air.receive_calls().await, 0);
    }

    #[tokio::test]
    async fn lost_frame_after_preamble_insists() {
        let settings = settings(true);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(
            SimFrame::clean(vec![1, 2], 8).with_fate(FrameFate::LostAfterPreamble),
        )
        .await;

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::Failed { insist: true }));
        assert_eq!(stats.recv_packets, 0);
    }

    #[tokio::test]
    async fn corrupt_frame_after_preamble_insists_and_counts() {
        let settings = settings(true);
        let mut radio = ready_radio(&settings).await;
        let air = radio.airwaves();
        air.transmit(SimFrame::clean(vec![7; 4], 10).with_fate(FrameFate::CorruptCrc))
            .await;

        let mut stats = TrafficStats::default();
        let outcome = receive_cycle(&mut radio, &settings, &mut stats).await;
        assert!(matches!(outcome, RecvOutcome::Failed { insist: true }));
        assert_eq!(stats.recv_packets, 1);
        assert_eq!(stats.recv_packets_crc_good, 0);
    }
}
