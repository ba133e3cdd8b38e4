//! Chip bring-up and recovery sequencing

use std::time::Duration;

use log::{info, warn};
use tokio::time::{sleep, Instant};

use crate::driver::RadioDriver;
use crate::{ChipSettings, RadioError};

/// Bring-up attempts granted at startup before giving up for good.
pub const STARTUP_ATTEMPTS: u32 = 200;
/// Wall-clock interval between unconditional chip restarts.
pub const FORCED_RESTART_INTERVAL: Duration = Duration::from_secs(2700);

/// Settle time after a reset pulse, letting the automatic calibration finish.
const RESET_SETTLE: Duration = Duration::from_millis(10);
const RECOVERY_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Sequences chip bring-up and the periodic forced-recovery policy.
/// Owns no concurrency; invoked only from the loop that owns the driver.
pub struct ChipSupervisor {
    settings: ChipSettings,
    next_forced_restart: Instant,
}

impl ChipSupervisor {
    pub fn new(settings: ChipSettings) -> Self {
        Self {
            next_forced_restart: Instant::now() + FORCED_RESTART_INTERVAL,
            settings,
        }
    }

    /// One bring-up cycle: pulse the reset line when one is wired up,
    /// wait out the settle time, then push the settings snapshot.
    pub async fn bring_up(&self, driver: &mut dyn RadioDriver) -> Result<(), RadioError> {
        if self.settings.reset_line.is_some() {
            driver.reset().await;
            sleep(RESET_SETTLE).await;
        }
        driver.begin(&self.settings).await
    }

    /// Startup policy: bounded retry, fatal beyond the cap. The caller
    /// must not enter the forwarding loop on an error.
    pub async fn start(&self, driver: &mut dyn RadioDriver) -> Result<(), RadioError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.bring_up(driver).await {
                Ok(()) => {
                    info!("LoRa chip setup succeeded");
                    return Ok(());
                }
                Err(e) if attempt >= STARTUP_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        "LoRa chip setup failed ({}), attempt {}/{}",
                        e, attempt, STARTUP_ATTEMPTS
                    );
                }
            }
        }
    }

    /// Steady-state recovery: once the interval has elapsed, force a
    /// full bring-up cycle regardless of current health, retrying until
    /// it succeeds. Meaningful only with a reset line; callers invoke
    /// this from the idle point of the loop, never mid-receive.
    pub async fn maybe_recover(&mut self, driver: &mut dyn RadioDriver) {
        if self.settings.reset_line.is_none() || Instant::now() < self.next_forced_restart {
            return;
        }
        self.next_forced_restart = Instant::now() + FORCED_RESTART_INTERVAL;
        loop {
            match self.bring_up(driver).await {
                Ok(()) => {
                    info!("regular LoRa chip reset done");
                    return;
                }
                Err(e) => {
                    warn!("regular LoRa chip reset failed ({}), retrying", e);
                    sleep(RECOVERY_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedRadio;
    use tokio::time::advance;

    fn settings(reset_line: Option<u8>) -> ChipSettings {
        ChipSettings {
            reset_line,
            ..ChipSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn startup_gives_up_after_the_cap() {
        let settings = settings(None);
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();
        air.fail_next_begins(u32::MAX).await;

        let supervisor = ChipSupervisor::new(settings);
        assert!(supervisor.start(&mut radio).await.is_err());
        assert_eq!(air.begin_calls().await, STARTUP_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_retries_until_success() {
        let settings = settings(None);
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();
        air.fail_next_begins(3).await;

        let supervisor = ChipSupervisor::new(settings);
        assert!(supervisor.start(&mut radio).await.is_ok());
        assert_eq!(air.begin_calls().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn bring_up_pulses_the_reset_line() {
        let settings = settings(Some(22));
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();

        let supervisor = ChipSupervisor::new(settings);
        supervisor.bring_up(&mut radio).await.unwrap();
        assert_eq!(air.reset_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_waits_for_the_interval() {
        let settings = settings(Some(22));
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();

        let mut supervisor = ChipSupervisor::new(settings);
        supervisor.maybe_recover(&mut radio).await;
        assert_eq!(air.begin_calls().await, 0);

        advance(FORCED_RESTART_INTERVAL).await;
        supervisor.maybe_recover(&mut radio).await;
        assert_eq!(air.begin_calls().await, 1);

        // the next cycle is scheduled from now, not from the last one
        supervisor.maybe_recover(&mut radio).await;
        assert_eq!(air.begin_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_retries_until_the_chip_answers() {
        let settings = settings(Some(22));
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();
        air.fail_next_begins(2).await;

        let mut supervisor = ChipSupervisor::new(settings);
        advance(FORCED_RESTART_INTERVAL).await;
        supervisor.maybe_recover(&mut radio).await;
        assert_eq!(air.begin_calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reset_line_means_no_forced_recovery() {
        let settings = settings(None);
        let mut radio = SimulatedRadio::new(&settings);
        let air = radio.airwaves();

        let mut supervisor = ChipSupervisor::new(settings);
        advance(FORCED_RESTART_INTERVAL * 2).await;
        supervisor.maybe_recover(&mut radio).await;
        assert_eq!(air.begin_calls().await, 0);
    }
}
