//! Termination signals that abort a run.
//!
//! Handlers are installed before any work starts so that a signal arriving
//! early is still reported instead of killing the process outright.

use nix::sys::signal::Signal as Number;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::warn;

use crate::utils::errors::{Result, RotateError};

pub struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    /// Install handlers for SIGINT, SIGTERM and SIGHUP.
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal, returned as the error ending the run.
    pub async fn recv(&mut self) -> RotateError {
        let (name, signal) = tokio::select! {
            _ = self.interrupt.recv() => ("SIGINT", Number::SIGINT as i32),
            _ = self.terminate.recv() => ("SIGTERM", Number::SIGTERM as i32),
            _ = self.hangup.recv() => ("SIGHUP", Number::SIGHUP as i32),
        };
        warn!("Received {name}, aborting backup");
        RotateError::Interrupted { name, signal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    #[tokio::test]
    async fn test_hangup_is_reported() {
        let mut signals = Signals::install().unwrap();
        kill(Pid::this(), NixSignal::SIGHUP).unwrap();

        let err = signals.recv().await;
        assert!(matches!(err, RotateError::Interrupted { name: "SIGHUP", signal: 1 }));
        assert_eq!(err.exit_code(), 129);
    }
}
