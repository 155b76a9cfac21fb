//! HTTP reachability probe feeding a `NetworkMonitor`.

use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::NetworkMonitor;
use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use crate::util::log_excerpt;

/// Periodically issues `HEAD` requests against a URL and reports reachability.
///
/// Any HTTP response counts as connected, including error statuses: the
/// question is whether the backend can be reached, not whether it is healthy.
#[derive(Clone)]
pub struct ConnectivityProbe {
    client: Client,
    config: ProbeConfig,
    monitor: NetworkMonitor,
}

impl ConnectivityProbe {
    pub fn new(config: ProbeConfig, monitor: NetworkMonitor) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| Error::Config(format!("failed to build probe HTTP client: {error}")))?;
        Ok(Self {
            client,
            config,
            monitor,
        })
    }

    /// Probe once and report the result to the monitor.
    pub async fn check_once(&self) -> bool {
        let connected = match self.client.head(&self.config.url).send().await {
            Ok(response) => {
                tracing::debug!(
                    "Connectivity probe {} answered HTTP {}",
                    self.config.url,
                    response.status().as_u16()
                );
                true
            }
            Err(error) => {
                tracing::debug!(
                    "Connectivity probe {} failed: {}",
                    self.config.url,
                    log_excerpt(&error.to_string())
                );
                false
            }
        };
        self.monitor.set_connected(connected);
        connected
    }

    /// Run the probe loop on the current runtime until the handle is aborted.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("Cannot start connectivity probe outside a tokio runtime");
            return None;
        };
        tracing::info!(
            "Starting connectivity probe against {} every {:?}",
            self.config.url,
            self.config.interval()
        );
        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        }))
    }
}
