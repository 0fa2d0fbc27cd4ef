//! Reconnect Supervisor (RC), §4.8.
//!
//! Classifies a terminated session by [`CoreError::reconnect_class`]
//! and decides what the caller should do next. The supervisor itself
//! never touches a socket — it only owns the retry loop and the
//! bookkeeping around "did we already stop the old worker before
//! trying again", which the caller's `reconnect` closure is required
//! to have done before this is called (§4.8: "all timers and the PS
//! worker must be stopped before the first reconnect attempt").

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};
use wavry_common::{CoreConfig, CoreError, ReconnectClass};

/// What the caller should do after a session ended with the given
/// error.
#[derive(Debug)]
pub enum SupervisorAction {
    /// Tunnel is healthy, only the partner left. Stay registered and
    /// wait for a new pairing; no retry loop needed.
    ResumeIdleRegistered,
    /// The relay or direct listener was lost. Run
    /// [`ReconnectSupervisor::reconnect`] to re-register.
    Reconnect,
    /// Not retryable; surface the error to the user as-is.
    GiveUp(CoreError),
}

pub struct ReconnectSupervisor {
    config: CoreConfig,
}

impl ReconnectSupervisor {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    /// Turn a session-ending error into the action the caller should
    /// take (§4.8's three-way classification, made concrete).
    pub fn classify(&self, err: CoreError) -> SupervisorAction {
        match err.reconnect_class() {
            ReconnectClass::RetryPartner => SupervisorAction::ResumeIdleRegistered,
            ReconnectClass::RetryServer => SupervisorAction::Reconnect,
            ReconnectClass::Fatal => SupervisorAction::GiveUp(err),
        }
    }

    /// Retry `connect` up to `config.reconnect_attempts` times at
    /// `config.reconnect_delay_ms` intervals. `connect` receives the
    /// zero-based attempt number so the caller can regenerate its
    /// `ClientId` each time, as the spec requires. Returns the first
    /// success, or [`CoreError::ReconnectFailed`] once the budget is
    /// exhausted.
    pub async fn reconnect<F, Fut, T>(&self, mut connect: F) -> Result<T, CoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = self.config.reconnect_attempts.max(1);
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut last_err = None;

        for attempt in 0..attempts {
            match connect(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt, "reconnected");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let _ = last_err;
        warn!(attempts, "giving up after exhausting reconnect budget");
        Err(CoreError::ReconnectFailed(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.reconnect_attempts = 3;
        config.reconnect_delay_ms = 1;
        config
    }

    #[test]
    fn partner_left_resumes_idle_registered() {
        let supervisor = ReconnectSupervisor::new(CoreConfig::default());
        assert!(matches!(
            supervisor.classify(CoreError::PartnerLeft),
            SupervisorAction::ResumeIdleRegistered
        ));
    }

    #[test]
    fn server_lost_triggers_reconnect() {
        let supervisor = ReconnectSupervisor::new(CoreConfig::default());
        assert!(matches!(
            supervisor.classify(CoreError::server_lost("relay gone")),
            SupervisorAction::Reconnect
        ));
    }

    #[test]
    fn auth_failure_gives_up() {
        let supervisor = ReconnectSupervisor::new(CoreConfig::default());
        assert!(matches!(
            supervisor.classify(CoreError::Auth),
            SupervisorAction::GiveUp(CoreError::Auth)
        ));
    }

    #[tokio::test]
    async fn reconnect_succeeds_after_transient_failures() {
        let supervisor = ReconnectSupervisor::new(fast_config());
        let calls = AtomicU32::new(0);

        let result = supervisor
            .reconnect(|attempt| {
                let calls = &calls;
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(CoreError::server_lost("still down"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_exhausting_budget() {
        let supervisor = ReconnectSupervisor::new(fast_config());
        let result: Result<(), CoreError> = supervisor
            .reconnect(|_attempt| async { Err(CoreError::server_lost("down")) })
            .await;
        assert!(matches!(result, Err(CoreError::ReconnectFailed(3))));
    }

    #[tokio::test]
    async fn each_attempt_gets_a_fresh_client_id_hint() {
        let supervisor = ReconnectSupervisor::new(fast_config());
        let seen = std::sync::Mutex::new(Vec::new());
        let _: Result<(), CoreError> = supervisor
            .reconnect(|attempt| {
                seen.lock().unwrap().push(attempt);
                async move { Err(CoreError::server_lost("down")) }
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
