use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
}

impl HealthReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<HealthReport, StoreError>;
}

/// Up/down signal derived from periodic health checks. Transitions are
/// logged once, not on every poll.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    last: Option<bool>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first poll completes.
    #[must_use]
    pub fn is_up(&self) -> Option<bool> {
        self.last
    }

    pub async fn poll<P: HealthProbe + ?Sized>(&mut self, probe: &P) -> bool {
        let result = probe.check().await;
        self.observe(&result)
    }

    /// Folds one check result into the signal. Any error counts as down.
    pub fn observe(&mut self, result: &Result<HealthReport, StoreError>) -> bool {
        let up = match result {
            Ok(report) => report.is_ok(),
            Err(error) => {
                debug!(%error, "health check failed");
                false
            }
        };
        if self.last != Some(up) {
            info!(up, "store health changed");
        }
        self.last = Some(up);
        up
    }
}
