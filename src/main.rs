use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use conformd::conformance::{ConformanceTasks, RetryPolicy};
use conformd::config::Config;
use conformd::core::TaskGraph;
use conformd::lock::{LockObjectReference, LockType};
use conformd::orchestration::{JobEngine, JobRequest};
use conformd::persistence::{
    ChannelSink, DeploymentSpec, DistributedAppliance, DistributedApplianceInstance, MemoryStore,
    VirtualSystem, VirtualizationConnector, VirtualizationType,
};
use conformd::plugin::{PluginRegistry, SimulatedClusterPlugin};
use conformd::Result;

/// conformd - reconcile desired appliance deployments with the cluster
#[derive(Parser, Debug)]
#[command(name = "conformd")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONFORMD_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conformd/conformd.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Conform a deployment spec against a simulated cluster and print the job
    Demo {
        /// Instance count of the deployment spec
        #[arg(long, default_value_t = 3)]
        pods: u32,

        /// Appliance instances left over from an earlier run
        #[arg(long, default_value_t = 0)]
        existing: u32,

        /// Never let the deployment become ready
        #[arg(long)]
        stall: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    conformd::log::init_with_debug(cli.debug)?;

    let config = Config::load()?;
    match cli.command {
        Command::Demo {
            pods,
            existing,
            stall,
        } => run_demo(config, pods, existing, stall),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_demo(config: Config, pods: u32, existing: u32, stall: bool) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let vc = store.insert(VirtualizationConnector::new(
        "demo-k8s",
        VirtualizationType::Kubernetes,
        "https://127.0.0.1:6443",
    ));
    let da = store.insert(DistributedAppliance::new("demo-firewall"));
    let vs = store.insert(VirtualSystem::new("demo-firewall-k8s", da.id, vc.id, "firewall:latest"));
    let ds = store.insert(DeploymentSpec::new("demo", vs.id, "default", pods));
    for n in 0..existing {
        let mut dai = DistributedApplianceInstance::new(&format!("stale-{}", n), vs.id);
        dai.ds_id = Some(ds.id);
        dai.external_id = Some(format!("stale-pod-{}", n));
        store.insert(dai);
    }

    let registry = Arc::new(PluginRegistry::new());
    let plugin = SimulatedClusterPlugin::new();
    plugin.register(&registry);
    plugin.cluster(vc.id).set_stalled(stall);

    let (events, rx) = ChannelSink::unbounded();
    let tasks = ConformanceTasks::new(Arc::clone(&registry), RetryPolicy::from_config(&config));
    let engine = JobEngine::new(config, store.clone(), Arc::new(events));

    let mut graph = TaskGraph::new();
    graph.add_task(tasks.conform_deployment_spec(&ds));
    let request = JobRequest::new(&format!("Conform Deployment Spec '{}'", ds.name), graph)
        .with_lock(LockObjectReference::from_entity(&vs), LockType::Read);

    let rt = tokio::runtime::Runtime::new()?;
    let record = rt.block_on(async {
        let id = engine.submit_request(request).await?;
        let record = engine.wait(&id).await;
        engine.shutdown().await;
        record
    })?;
    plugin.shutdown();

    let published = rx.try_iter().count();
    info!(job = %record.id.short(), status = %record.status, published, "Demo finished");

    let json_output = serde_json::json!({
        "job": record,
        "instances": store.all::<DistributedApplianceInstance>(),
        "events_published": published,
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}
