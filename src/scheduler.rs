use crate::api::WaterMeterApi;
use crate::config::AppConfig;
use crate::error::SetupError;
use crate::identity::MeterIdentity;
use crate::refresh::{RefreshSettings, WaterMeterCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

/// Owns one refresh task per configured meter.
pub struct MeterScheduler {
    coordinators: Vec<Arc<WaterMeterCoordinator>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeterScheduler {
    /// Validates every meter's credentials and starts refreshing the ones that pass.
    ///
    /// Meters the vendor rejects are logged and left out. A meter whose check
    /// cannot reach the vendor is scheduled anyway and stays unavailable until
    /// a refresh gets through.
    pub async fn start(config: &AppConfig, identities: Vec<MeterIdentity>) -> Self {
        let api = WaterMeterApi::new(config.base_url.clone());
        let settings = RefreshSettings::from(config);
        let mut scheduler = Self {
            coordinators: Vec::new(),
            tasks: Vec::new(),
        };

        for identity in identities {
            let check = timeout(config.timeout(), api.validate_credentials(&identity))
                .await
                .unwrap_or_else(|_| {
                    Err(SetupError::ConnectionFailed(format!(
                        "no response within {:?}",
                        config.timeout()
                    )))
                });
            match check {
                Ok(()) => {}
                Err(e @ SetupError::ConnectionFailed(_)) => {
                    warn!(
                        meter = %identity.meter_no,
                        company = %identity.company_id,
                        error = %e,
                        "vendor unreachable during setup, scheduling anyway"
                    );
                }
                Err(e) => {
                    error!(
                        meter = %identity.meter_no,
                        company = %identity.company_id,
                        error = %e,
                        "meter setup failed, not scheduling"
                    );
                    continue;
                }
            }
            let coordinator = Arc::new(WaterMeterCoordinator::new(identity, api.clone(), settings));
            scheduler.schedule(coordinator, config.update_interval());
        }

        info!(meters = scheduler.coordinators.len(), "meter refresh tasks started");
        scheduler
    }

    /// Refreshes `coordinator` right away and then every `period`.
    pub fn schedule(&mut self, coordinator: Arc<WaterMeterCoordinator>, period: Duration) {
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { Self::run(coordinator, period).await })
        };
        self.coordinators.push(coordinator);
        self.tasks.push(task);
    }

    pub fn coordinators(&self) -> &[Arc<WaterMeterCoordinator>] {
        &self.coordinators
    }

    async fn run(coordinator: Arc<WaterMeterCoordinator>, period: Duration) {
        let meter = coordinator.identity().meter_no.clone();
        info!(%meter, ?period, "starting refresh loop");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // First tick completes immediately, giving the initial refresh
            ticker.tick().await;
            if let Err(e) = coordinator.refresh().await {
                error!(%meter, error = %e, "readings unavailable until next refresh");
            }
        }
    }
}

impl Drop for MeterScheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
