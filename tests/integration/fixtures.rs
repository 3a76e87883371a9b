//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Leaf tasks that record when they ran
//! - Meta-tasks that expand into a prepared graph
//! - An engine harness and a simulated Kubernetes environment

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use conformd::conformance::{ConformanceTasks, RetryPolicy};
use conformd::config::Config;
use conformd::core::{MetaTask, Task, TaskGraph, TaskStatus, Work};
use conformd::lock::{LockObjectReference, ObjectType};
use conformd::orchestration::{JobEngine, JobId, JobRecord};
use conformd::persistence::{
    transaction, ChannelSink, DeploymentSpec, DistributedAppliance, EntityEvent, MemoryStore, NullSink,
    UnitOfWork, VirtualSystem, VirtualizationConnector, VirtualizationType,
};
use conformd::plugin::{deployment_label, PluginRegistry, SimulatedCluster, SimulatedClusterPlugin};
use conformd::{Error, Result};

/// How long any single test waits for a job.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(10);

/// One finished task body.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared log of task bodies in completion order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Entry) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.name).collect()
    }

    pub fn ran(&self, name: &str) -> bool {
        self.entries().iter().any(|e| e.name == name)
    }

    pub fn entry(&self, name: &str) -> Entry {
        self.entries()
            .into_iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("{} never ran", name))
    }
}

/// Configurable leaf task.
pub struct Step {
    name: String,
    fail: bool,
    delay: Duration,
    objects: BTreeSet<LockObjectReference>,
    journal: Journal,
}

impl Step {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            delay: Duration::ZERO,
            objects: BTreeSet::new(),
            journal: journal.clone(),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn locking(mut self, object: LockObjectReference) -> Self {
        self.objects.insert(object);
        self
    }

    pub fn work(self) -> Work {
        Work::task(self)
    }
}

impl Task for Step {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        self.objects.clone()
    }

    fn execute(&self, _uow: &mut UnitOfWork<'_>) -> Result<()> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.journal.push(Entry {
            name: self.name.clone(),
            started,
            finished: Instant::now(),
        });
        if self.fail {
            Err(Error::External(format!("{} failed", self.name)))
        } else {
            Ok(())
        }
    }
}

/// Meta-task expanding into a fixed graph, or failing.
pub struct Expand {
    name: String,
    graph: Option<TaskGraph>,
}

impl Expand {
    pub fn new(name: &str, graph: TaskGraph) -> Work {
        Work::meta(Self {
            name: name.to_string(),
            graph: Some(graph),
        })
    }

    pub fn failing(name: &str) -> Work {
        Work::meta(Self {
            name: name.to_string(),
            graph: None,
        })
    }
}

impl MetaTask for Expand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn expand(&self, _uow: &mut UnitOfWork<'_>) -> Result<TaskGraph> {
        self.graph
            .clone()
            .ok_or_else(|| Error::External(format!("{} could not plan", self.name)))
    }
}

pub fn object(id: u64, name: &str) -> LockObjectReference {
    LockObjectReference::new(ObjectType::DeploymentSpec, id, name)
}

/// Engine over an empty in-memory store.
pub struct Harness {
    pub engine: Arc<JobEngine>,
    pub store: Arc<MemoryStore>,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(JobEngine::new(config, store.clone(), Arc::new(NullSink)));
        Self {
            engine,
            store,
            journal: Journal::new(),
        }
    }

    pub fn step(&self, name: &str) -> Step {
        Step::new(name, &self.journal)
    }

    /// Submit a graph and wait for the job to finish.
    pub async fn run(&self, name: &str, graph: TaskGraph) -> JobRecord {
        let id = self.engine.submit(name, graph).await.unwrap();
        self.wait(&id).await
    }

    pub async fn wait(&self, id: &JobId) -> JobRecord {
        self.engine.wait_timeout(id, JOB_TIMEOUT).await.unwrap()
    }

    /// Poll until `task` reaches `status`.
    pub async fn wait_for_task(&self, id: &JobId, task: &str, status: TaskStatus) {
        let deadline = Instant::now() + JOB_TIMEOUT;
        loop {
            let record = self.engine.query(id).await.unwrap();
            if record.task_by_name(task).is_some_and(|t| t.status == status) {
                return;
            }
            assert!(Instant::now() < deadline, "{} never reached {}", task, status);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// A Kubernetes connector backed by a simulated cluster, with one
/// deployment spec `web` in namespace `default`.
pub struct ClusterEnv {
    pub store: Arc<MemoryStore>,
    pub plugin: Arc<SimulatedClusterPlugin>,
    pub tasks: ConformanceTasks,
    pub engine: JobEngine,
    pub events: Receiver<EntityEvent>,
    pub vc: VirtualizationConnector,
    pub vs: VirtualSystem,
    pub ds: DeploymentSpec,
}

impl ClusterEnv {
    pub fn new(instance_count: u32, retry: RetryPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let vc = store.insert(VirtualizationConnector::new(
            "k8s",
            VirtualizationType::Kubernetes,
            "https://k8s.local",
        ));
        let da = store.insert(DistributedAppliance::new("firewall"));
        let vs = store.insert(VirtualSystem::new("firewall-k8s", da.id, vc.id, "fw:1.0"));
        let ds = store.insert(DeploymentSpec::new("web", vs.id, "default", instance_count));

        let registry = Arc::new(PluginRegistry::new());
        let plugin = SimulatedClusterPlugin::new();
        plugin.register(&registry);

        let (sink, events) = ChannelSink::unbounded();
        let engine = JobEngine::new(Config::default(), store.clone(), Arc::new(sink));

        Self {
            store,
            plugin,
            tasks: ConformanceTasks::new(registry, retry),
            engine,
            events,
            vc,
            vs,
            ds,
        }
    }

    pub fn cluster(&self) -> Arc<SimulatedCluster> {
        self.plugin.cluster(self.vc.id)
    }

    pub fn label(&self) -> String {
        deployment_label(&self.ds)
    }

    /// Apply a change to the stored spec outside any job.
    pub fn update_ds(&self, change: impl FnOnce(&mut DeploymentSpec)) {
        transaction::execute(self.store.as_ref(), &NullSink, |uow| {
            let mut ds = uow.find::<DeploymentSpec>(self.ds.id)?;
            change(&mut ds);
            uow.update(&ds)
        })
        .unwrap();
    }

    pub async fn run(&self, work: Work) -> JobRecord {
        let mut graph = TaskGraph::new();
        graph.add_task(work);
        let id = self.engine.submit("conform", graph).await.unwrap();
        self.engine.wait_timeout(&id, JOB_TIMEOUT).await.unwrap()
    }
}

pub fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(10))
}
