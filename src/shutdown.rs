// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Graceful shutdown
//!
//! [`ShutdownSignal`] is the process-wide flag, written once by the signal
//! handler and read by every Action. [`ShutdownCoordinator`] is the per-Action
//! half: it decides, at each dispatch point, whether the Action must stop
//! and how.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    grace_period: Duration,
}

impl ShutdownSignal {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Flip the flag. Returns true only for the call that flipped it.
    pub fn initiate(&self) -> bool {
        let flipped = self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            tracing::info!(
                grace_period_secs = self.grace_period.as_secs(),
                "shutdown initiated"
            );
        }
        flipped
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub async fn wait_grace_period(&self) {
        tokio::time::sleep(self.grace_period).await;
    }

    /// Initiate shutdown on ctrl-c.
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received ctrl-c");
                    signal.initiate();
                }
                Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// What an Action must do at a dispatch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDecision {
    /// Not shutting down, or interception disabled
    Proceed,
    /// First interception: pause reads, then roll back or respond
    Intercept { rollback: bool },
    /// An auth sub-call aborted during shutdown; the scheduled guard is not
    /// consulted on this path
    AuthAborted { rollback: bool },
    /// Already intercepted; the response is on its way
    Suppress,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    check_enabled: bool,
    response_scheduled: bool,
}

impl ShutdownCoordinator {
    pub fn new(check_enabled: bool) -> Self {
        Self {
            check_enabled,
            response_scheduled: false,
        }
    }

    pub fn is_response_scheduled(&self) -> bool {
        self.response_scheduled
    }

    /// Set when the Action responds on its own, so a later shutdown check
    /// does not try to respond again.
    pub fn mark_response_scheduled(&mut self) {
        self.response_scheduled = true;
    }

    pub fn evaluate(
        &mut self,
        signal: &ShutdownSignal,
        auth_aborted: bool,
        has_rollback_steps: bool,
    ) -> ShutdownDecision {
        if !self.check_enabled || !signal.is_shutting_down() {
            return ShutdownDecision::Proceed;
        }
        if auth_aborted {
            return ShutdownDecision::AuthAborted {
                rollback: has_rollback_steps,
            };
        }
        if self.response_scheduled {
            return ShutdownDecision::Suppress;
        }
        self.response_scheduled = true;
        ShutdownDecision::Intercept {
            rollback: has_rollback_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_flips_once() {
        let signal = ShutdownSignal::new(Duration::from_millis(5));
        assert!(!signal.is_shutting_down());
        assert!(signal.initiate());
        assert!(!signal.initiate());
        assert!(signal.is_shutting_down());

        let clone = signal.clone();
        assert!(clone.is_shutting_down());
    }

    #[test]
    fn test_coordinator_proceeds_until_shutdown() {
        let signal = ShutdownSignal::default();
        let mut coordinator = ShutdownCoordinator::new(true);
        assert_eq!(
            coordinator.evaluate(&signal, false, true),
            ShutdownDecision::Proceed
        );
        assert!(!coordinator.is_response_scheduled());
    }

    #[test]
    fn test_coordinator_intercepts_once() {
        let signal = ShutdownSignal::default();
        signal.initiate();
        let mut coordinator = ShutdownCoordinator::new(true);

        assert_eq!(
            coordinator.evaluate(&signal, false, true),
            ShutdownDecision::Intercept { rollback: true }
        );
        assert!(coordinator.is_response_scheduled());
        assert_eq!(
            coordinator.evaluate(&signal, false, true),
            ShutdownDecision::Suppress
        );
    }

    #[test]
    fn test_auth_aborted_ignores_scheduled_guard() {
        let signal = ShutdownSignal::default();
        signal.initiate();
        let mut coordinator = ShutdownCoordinator::new(true);
        coordinator.evaluate(&signal, false, false);

        assert_eq!(
            coordinator.evaluate(&signal, true, false),
            ShutdownDecision::AuthAborted { rollback: false }
        );
    }

    #[test]
    fn test_disabled_coordinator_never_intercepts() {
        let signal = ShutdownSignal::default();
        signal.initiate();
        let mut coordinator = ShutdownCoordinator::new(false);
        assert_eq!(
            coordinator.evaluate(&signal, true, true),
            ShutdownDecision::Proceed
        );
    }

    #[tokio::test]
    async fn test_wait_grace_period() {
        let signal = ShutdownSignal::new(Duration::from_millis(10));
        let started = std::time::Instant::now();
        signal.wait_grace_period().await;
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
