use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::health::{CompositeReport, HealthAggregator, HealthReport, HealthStatus};
use crate::kernel::{Context, ContextError};
use crate::plugin_system::Plugin;
use crate::tests::common::{CallLog, Probe, ScriptedPlugin};

#[test]
fn test_combine_statuses() {
    use HealthStatus::*;
    assert_eq!(HealthStatus::combine([]), Healthy);
    assert_eq!(HealthStatus::combine([Healthy, Healthy]), Healthy);
    assert_eq!(HealthStatus::combine([Healthy, Degraded]), Degraded);
    assert_eq!(HealthStatus::combine([Timeout, Healthy]), Degraded);
    assert_eq!(HealthStatus::combine([Degraded, Unhealthy, Timeout]), Unhealthy);
}

#[test]
fn test_composite_report_json_shape() {
    let mut plugins = BTreeMap::new();
    plugins.insert("auth".to_string(), HealthReport::healthy());
    plugins.insert("transcoder".to_string(), HealthReport::degraded("queue backlog"));
    let report = CompositeReport::from_reports(plugins);

    assert!(!report.is_healthy());
    assert_eq!(report.get("transcoder").map(|r| r.status), Some(HealthStatus::Degraded));
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        serde_json::json!({
            "status": "degraded",
            "plugins": {
                "auth": {"status": "healthy", "detail": null},
                "transcoder": {"status": "degraded", "detail": "queue backlog"},
            }
        })
    );
}

#[test]
fn test_not_running_report() {
    let report = CompositeReport::not_running();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.plugins.is_empty());
    assert_eq!(CompositeReport::from_reports(BTreeMap::new()).status, HealthStatus::Healthy);
}

fn scripted(name: &str, probe: Probe, log: &CallLog) -> Arc<dyn Plugin> {
    ScriptedPlugin::new(name, log).on_health(probe).arc()
}

#[tokio::test(start_paused = true)]
async fn test_aggregator_bounds_slow_probes() {
    let log = CallLog::new();
    let aggregator = HealthAggregator::new(Duration::from_secs(2));
    let plugins = vec![
        scripted("fast", Probe::Report(HealthReport::healthy()), &log),
        scripted("stuck", Probe::Hang, &log),
    ];

    let begun = tokio::time::Instant::now();
    let report = aggregator.check(&Context::background(), plugins).await;

    assert!(begun.elapsed() <= Duration::from_secs(3));
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.get("fast").map(|r| r.status), Some(HealthStatus::Healthy));
    let stuck = report.get("stuck").unwrap();
    assert_eq!(stuck.status, HealthStatus::Timeout);
    assert_eq!(stuck.detail.as_deref(), Some("context deadline exceeded"));
}

#[tokio::test]
async fn test_aggregator_records_panics_as_unhealthy() {
    let log = CallLog::new();
    let report = HealthAggregator::default()
        .check(
            &Context::background(),
            vec![
                scripted("ok", Probe::Report(HealthReport::healthy()), &log),
                scripted("broken", Probe::Panic, &log),
            ],
        )
        .await;

    assert_eq!(report.status, HealthStatus::Unhealthy);
    let broken = report.get("broken").unwrap();
    assert_eq!(broken.status, HealthStatus::Unhealthy);
    assert!(broken.detail.as_deref().unwrap().starts_with("health probe failed"));
}

#[tokio::test]
async fn test_probe_one_respects_cancelled_context() {
    let log = CallLog::new();
    let ctx = Context::background();
    ctx.cancel();
    let result = HealthAggregator::default()
        .probe_one(&ctx, scripted("stuck", Probe::Hang, &log))
        .await;
    assert_eq!(result, Err(ContextError::Cancelled));
}
