use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::health::{CompositeReport, HealthReport};
use crate::kernel::constants::DEFAULT_HEALTH_TIMEOUT;
use crate::kernel::context::{Context, ContextError};
use crate::plugin_system::Plugin;

/// Fans health probes out across plugins under one shared deadline.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    timeout: Duration,
}

impl HealthAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe every plugin concurrently.
    ///
    /// The deadline is the earlier of `ctx`'s and now + the configured
    /// timeout. A plugin that has not answered by then is recorded as
    /// `timeout`; a probe that panics is recorded as `unhealthy`.
    pub async fn check(&self, ctx: &Context, plugins: Vec<Arc<dyn Plugin>>) -> CompositeReport {
        let probe_ctx = ctx.with_timeout(self.timeout);
        let probes = plugins.into_iter().map(|plugin| {
            let ctx = probe_ctx.clone();
            async move {
                let name = plugin.name().to_string();
                let report = match probe(&ctx, plugin).await {
                    Ok(report) => report,
                    Err(reason) => {
                        log::warn!("Health probe for '{}' did not answer: {}", name, reason);
                        HealthReport::timeout(reason.to_string())
                    }
                };
                (name, report)
            }
        });
        let reports: BTreeMap<String, HealthReport> = join_all(probes).await.into_iter().collect();
        CompositeReport::from_reports(reports)
    }

    /// Probe a single plugin under the configured timeout.
    pub async fn probe_one(&self, ctx: &Context, plugin: Arc<dyn Plugin>) -> Result<HealthReport, ContextError> {
        probe(&ctx.with_timeout(self.timeout), plugin).await
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_TIMEOUT)
    }
}

async fn probe(ctx: &Context, plugin: Arc<dyn Plugin>) -> Result<HealthReport, ContextError> {
    let task_ctx = ctx.clone();
    let mut task = tokio::spawn(async move { plugin.health(&task_ctx).await });
    match ctx.run(&mut task).await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(join_err)) => Ok(HealthReport::unhealthy(format!("health probe failed: {}", join_err))),
        Err(reason) => {
            task.abort();
            Err(reason)
        }
    }
}
