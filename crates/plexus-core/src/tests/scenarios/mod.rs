//! The same media plugins deployed both ways: co-located on one in-process
//! bus, and split across kernels that share a broker.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::KernelConfig;
use crate::event::types::topics;
use crate::event::{Event, EventBus, MemoryBroker, NetworkedBus, NetworkedBusOptions, handler_fn};
use crate::health::{HealthReport, HealthStatus};
use crate::kernel::{Context, KernelHandle, KernelState, Microkernel};
use crate::plugin_system::{Plugin, PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Upload {
    file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Rendition {
    file: String,
    profile: String,
}

/// Turns every upload into a 720p rendition.
#[derive(Default)]
struct Transcoder {
    kernel: Mutex<Option<KernelHandle>>,
}

#[async_trait]
impl Plugin for Transcoder {
    fn name(&self) -> &str {
        "transcoder"
    }

    fn version(&self) -> &str {
        "0.3.0"
    }

    async fn init(&self, _ctx: &Context, kernel: KernelHandle) -> PluginResult<()> {
        *self.kernel.lock().unwrap() = Some(kernel);
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> PluginResult<()> {
        let kernel = self
            .kernel
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PluginError::Start("not initialized".into()))?;
        let publisher = kernel.clone();
        kernel
            .subscribe_event(
                topics::FILE_UPLOADED,
                handler_fn(move |event: Arc<Event>| {
                    let publisher = publisher.clone();
                    async move {
                        let Ok(upload) = event.payload_json::<Upload>() else {
                            return;
                        };
                        let rendition = Rendition {
                            file: upload.file,
                            profile: "720p".to_string(),
                        };
                        let _ = publisher.publish_json(topics::TRANSCODING_COMPLETED, &rendition).await;
                    }
                }),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> PluginResult<()> {
        Ok(())
    }

    async fn health(&self, _ctx: &Context) -> HealthReport {
        HealthReport::healthy()
    }
}

/// Records every finished rendition.
#[derive(Default)]
struct Catalog {
    renditions: Arc<Mutex<Vec<Rendition>>>,
}

#[async_trait]
impl Plugin for Catalog {
    fn name(&self) -> &str {
        "catalog"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    async fn init(&self, _ctx: &Context, kernel: KernelHandle) -> PluginResult<()> {
        let renditions = Arc::clone(&self.renditions);
        kernel
            .subscribe(topics::TRANSCODING_COMPLETED, move |payload: &[u8]| {
                if let Ok(rendition) = serde_json::from_slice::<Rendition>(payload) {
                    renditions.lock().unwrap().push(rendition);
                }
            })
            .await?;
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> PluginResult<()> {
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> PluginResult<()> {
        Ok(())
    }

    async fn health(&self, _ctx: &Context) -> HealthReport {
        HealthReport::healthy()
    }
}

fn upload(file: &str) -> Event {
    Event::json(topics::FILE_UPLOADED, "upload-api", &Upload { file: file.to_string() }).unwrap()
}

fn expected(file: &str) -> Rendition {
    Rendition {
        file: file.to_string(),
        profile: "720p".to_string(),
    }
}

#[tokio::test]
async fn test_monolithic_pipeline() {
    let ctx = Context::background();
    let kernel = Microkernel::in_process();
    let catalog = Arc::new(Catalog::default());
    kernel.register(Arc::new(Transcoder::default())).unwrap();
    kernel.register(catalog.clone()).unwrap();
    kernel.start(&ctx).await.unwrap();

    // In-process delivery completes before publish returns.
    kernel.bus().publish(upload("intro.mp4")).await.unwrap();
    assert_eq!(*catalog.renditions.lock().unwrap(), vec![expected("intro.mp4")]);

    let report = kernel.health_check(&ctx).await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.plugins.len(), 2);

    kernel.stop(&ctx).await.unwrap();
    assert_eq!(kernel.state(), KernelState::Stopped);
}

async fn networked_kernel(broker: &Arc<MemoryBroker>, plugin: Arc<dyn Plugin>) -> Microkernel {
    let bus = NetworkedBus::connect(Arc::new(broker.transport()), NetworkedBusOptions::default())
        .await
        .unwrap();
    let kernel = Microkernel::with_bus(KernelConfig::default(), Arc::new(bus));
    kernel.register(plugin).unwrap();
    kernel.start(&Context::background()).await.unwrap();
    kernel
}

#[tokio::test]
async fn test_microservice_pipeline() {
    let broker = MemoryBroker::new("media");
    let catalog = Arc::new(Catalog::default());
    let transcoding = networked_kernel(&broker, Arc::new(Transcoder::default())).await;
    let cataloguing = networked_kernel(&broker, catalog.clone()).await;
    let gateway = NetworkedBus::connect(Arc::new(broker.transport()), NetworkedBusOptions::default())
        .await
        .unwrap();

    gateway.publish(upload("trailer.mov")).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..50 {
        received = catalog.renditions.lock().unwrap().clone();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received, vec![expected("trailer.mov")]);

    let ctx = Context::background();
    transcoding.stop(&ctx).await.unwrap();
    cataloguing.stop(&ctx).await.unwrap();
    gateway.close().await.unwrap();
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn test_stopped_service_no_longer_consumes() {
    let broker = MemoryBroker::new("media-stop");
    let catalog = Arc::new(Catalog::default());
    let transcoding = networked_kernel(&broker, Arc::new(Transcoder::default())).await;
    let cataloguing = networked_kernel(&broker, catalog.clone()).await;
    let gateway = NetworkedBus::connect(Arc::new(broker.transport()), NetworkedBusOptions::default())
        .await
        .unwrap();

    cataloguing.stop(&Context::background()).await.unwrap();
    gateway.publish(upload("late.mkv")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(catalog.renditions.lock().unwrap().is_empty());
    transcoding.stop(&Context::background()).await.unwrap();
}
