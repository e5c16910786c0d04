use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::health::HealthReport;
use crate::kernel::{Context, KernelHandle};
use crate::plugin_system::{Plugin, PluginError, PluginResult};

/// Ordered record of hook calls shared between several test plugins.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Entries ending in `.suffix`, e.g. every `stop` call in order.
    pub fn calls(&self, suffix: &str) -> Vec<String> {
        let suffix = format!(".{}", suffix);
        self.entries().into_iter().filter(|e| e.ends_with(&suffix)).collect()
    }
}

/// How a lifecycle hook behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    /// Never completes on its own; only the context ends it.
    Hang,
}

#[derive(Debug, Clone)]
pub enum Probe {
    Report(HealthReport),
    Hang,
    Panic,
}

/// Plugin whose hooks follow a script and log every call.
pub struct ScriptedPlugin {
    name: String,
    log: CallLog,
    init: Step,
    start: Step,
    stop: Step,
    probe: Probe,
    metadata: BTreeMap<String, String>,
    handle: Mutex<Option<KernelHandle>>,
}

impl ScriptedPlugin {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            init: Step::Succeed,
            start: Step::Succeed,
            stop: Step::Succeed,
            probe: Probe::Report(HealthReport::healthy()),
            metadata: BTreeMap::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn on_init(mut self, step: Step) -> Self {
        self.init = step;
        self
    }

    pub fn on_start(mut self, step: Step) -> Self {
        self.start = step;
        self
    }

    pub fn on_stop(mut self, step: Step) -> Self {
        self.stop = step;
        self
    }

    pub fn on_health(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The handle received in `init`, if `init` ran.
    pub fn handle(&self) -> Option<KernelHandle> {
        self.handle.lock().unwrap().clone()
    }

    async fn perform(&self, hook: &str, step: Step, error: fn(String) -> PluginError) -> PluginResult<()> {
        self.log.push(format!("{}.{}", self.name, hook));
        match step {
            Step::Succeed => Ok(()),
            Step::Fail => Err(error(format!("{} {} scripted failure", self.name, hook))),
            Step::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    async fn init(&self, _ctx: &Context, kernel: KernelHandle) -> PluginResult<()> {
        let result = self.perform("init", self.init, PluginError::Init).await;
        if result.is_ok() {
            *self.handle.lock().unwrap() = Some(kernel);
        }
        result
    }

    async fn start(&self, _ctx: &Context) -> PluginResult<()> {
        self.perform("start", self.start, PluginError::Start).await
    }

    async fn stop(&self, _ctx: &Context) -> PluginResult<()> {
        self.perform("stop", self.stop, PluginError::Stop).await
    }

    async fn health(&self, _ctx: &Context) -> HealthReport {
        self.log.push(format!("{}.health", self.name));
        match &self.probe {
            Probe::Report(report) => report.clone(),
            Probe::Hang => std::future::pending().await,
            Probe::Panic => panic!("{} health probe exploded", self.name),
        }
    }
}
