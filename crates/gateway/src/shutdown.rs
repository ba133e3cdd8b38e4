//! Cooperative shutdown flag flipped by termination signals

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};

/// Process-wide run flag. Cleared exactly once; observed cooperatively
/// at loop-iteration granularity by the orchestrator and the sender.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_running(&self) -> bool {
        !self.0.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Route every termination-style signal to the run flag. The handlers
/// do nothing beyond the atomic store.
pub fn install(flag: &ShutdownFlag) -> Result<()> {
    let kinds = [
        SignalKind::interrupt(),
        SignalKind::hangup(),
        SignalKind::quit(),
        SignalKind::terminate(),
        SignalKind::from_raw(libc::SIGXFSZ),
    ];
    for kind in kinds {
        let mut stream = signal(kind)?;
        let flag = flag.clone();
        tokio::spawn(async move {
            stream.recv().await;
            flag.trigger();
        });
    }
    Ok(())
}
