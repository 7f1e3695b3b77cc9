use crate::api::WaterMeterApi;
use crate::config::AppConfig;
use crate::error::{AttemptError, UpdateFailed};
use crate::identity::MeterIdentity;
use crate::reconcile::{reconcile, NormalizedRecord};
use chrono::{DateTime, Datelike, Local, Utc};
use serde_derive::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Fetching,
    Retrying,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Deadline for one complete fetch+reconcile attempt
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retry_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl From<&AppConfig> for RefreshSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry_delay: config.retry_delay(),
            max_attempts: config.max_attempts,
        }
    }
}

/// What readers of a meter see. Replaced as a whole after every refresh.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Last successfully built record; kept after a failed refresh so it can be shown as stale
    pub record: Option<Arc<NormalizedRecord>>,
    /// False until the first success and after every failed refresh
    pub available: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Snapshot {
    /// The record, but only while it is current
    pub fn current_record(&self) -> Option<&NormalizedRecord> {
        self.record.as_deref().filter(|_| self.available)
    }
}

/// Runs refreshes for one meter and owns its published record.
pub struct WaterMeterCoordinator {
    identity: MeterIdentity,
    api: WaterMeterApi,
    settings: RefreshSettings,
    state: watch::Sender<RefreshState>,
    snapshot: watch::Sender<Snapshot>,
    in_flight: Mutex<()>,
}

impl WaterMeterCoordinator {
    pub fn new(identity: MeterIdentity, api: WaterMeterApi, settings: RefreshSettings) -> Self {
        let (state, _) = watch::channel(RefreshState::Idle);
        let (snapshot, _) = watch::channel(Snapshot::default());
        Self {
            identity,
            api,
            settings,
            state,
            snapshot,
            in_flight: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &MeterIdentity {
        &self.identity
    }

    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Fetches and reconciles with bounded retries, then publishes the result.
    ///
    /// Transport failures and timeouts are retried after a fixed delay; a
    /// vendor rejection ends the refresh at once. Concurrent calls are
    /// serialized.
    pub async fn refresh(&self) -> Result<Arc<NormalizedRecord>, UpdateFailed> {
        let _guard = self.in_flight.lock().await;
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.state.send_replace(RefreshState::Fetching);

            match self.attempt().await {
                Ok(record) => {
                    let record = Arc::new(record);
                    self.publish_success(record.clone());
                    info!(meter = %self.identity.meter_no, attempt, "refresh succeeded");
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        meter = %self.identity.meter_no,
                        attempt,
                        max_attempts,
                        error = %e,
                        "refresh attempt failed, retrying"
                    );
                    self.state.send_replace(RefreshState::Retrying);
                    sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    let failed = UpdateFailed {
                        attempts: attempt,
                        source: e,
                    };
                    warn!(meter = %self.identity.meter_no, error = %failed, "refresh failed");
                    self.publish_failure(&failed);
                    return Err(failed);
                }
            }
        }
    }

    async fn attempt(&self) -> Result<NormalizedRecord, AttemptError> {
        let current_year = Local::now().year();
        let record = timeout(
            self.settings.timeout,
            reconcile(&self.api, &self.identity, current_year),
        )
        .await
        .map_err(|_| AttemptError::Timeout(self.settings.timeout))??;
        Ok(record)
    }

    fn publish_success(&self, record: Arc<NormalizedRecord>) {
        self.snapshot.send_replace(Snapshot {
            record: Some(record),
            available: true,
            last_updated: Some(Utc::now()),
            last_error: None,
        });
        self.state.send_replace(RefreshState::Success);
    }

    fn publish_failure(&self, failed: &UpdateFailed) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.available = false;
            snapshot.last_error = Some(failed.to_string());
        });
        self.state.send_replace(RefreshState::Failed);
    }
}
