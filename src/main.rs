// Binary entrypoint: a thin CLI wired against the `relay_flow` library.
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use relay_flow::caller::{Caller, StubCaller};
use relay_flow::manager::{Context, Manager, RuntimeNode};
use relay_flow::manifest::{FlowResourceManager, Manifest};
use relay_flow::store::ReferenceStore;
use relay_flow::{config, definer, dependencies};

/// CLI entrypoint using `clap` to define subcommands.
#[derive(Parser)]
#[command(name = "relay-flow", version, about = "Declarative API-integration runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Load a manifest, resolve and type it, then execute one named flow
    /// against the demo stub transport.
    Run {
        /// Path to the manifest YAML/JSON file.
        manifest: PathBuf,
        /// Name of the flow to execute.
        flow: String,
    },
    /// Load a manifest and run dependency resolution + definition only, no
    /// execution.
    Validate {
        /// Path to the manifest YAML/JSON file.
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("relay_flow=info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { manifest } => {
            info!(path = %manifest.display(), "loading manifest");
            match load_and_define(&manifest) {
                Ok(m) => {
                    println!(
                        "manifest valid: {} flow(s), {} proxy/proxies",
                        m.flows.len(),
                        m.proxies.len()
                    );
                }
                Err(err) => {
                    error!(%err, "manifest invalid");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { manifest, flow } => {
            info!(path = %manifest.display(), "loading manifest");
            let loaded = match load_and_define(&manifest) {
                Ok(m) => m,
                Err(err) => {
                    error!(%err, "failed to load manifest");
                    std::process::exit(1);
                }
            };

            let Some(target) = loaded.get_flow(&flow) else {
                error!(flow = %flow, "flow not found in manifest");
                std::process::exit(1);
            };

            let runtime_nodes = target
                .nodes()
                .iter()
                .map(|node| RuntimeNode {
                    name: node.name.clone(),
                    call: node
                        .call
                        .as_ref()
                        .map(|_| Arc::new(StubCaller::new(node.name.clone())) as Arc<dyn Caller>),
                    rollback: node.rollback.as_ref().map(|_| {
                        Arc::new(StubCaller::new(format!("{}.rollback", node.name))) as Arc<dyn Caller>
                    }),
                    previous: node.previous.clone(),
                    next: node.next.clone(),
                })
                .collect();

            let manager = Arc::new(Manager::new(flow.clone(), runtime_nodes));
            let ctx = Arc::new(Context::new());
            let store = Arc::new(ReferenceStore::new());

            println!("running flow '{flow}' ({} node(s))", manager.node_count());

            match manager.do_flow(ctx, store).await {
                Ok(()) => println!("flow '{flow}' completed"),
                Err(err) => {
                    error!(%err, "flow execution failed");
                    println!("flow '{flow}' failed: {err}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn load_and_define(path: &PathBuf) -> anyhow::Result<Manifest> {
    let mut loaded = config::load_manifest(path)?;
    dependencies::resolve_manifest_dependencies(&mut loaded)?;
    definer::define_manifest(&mut loaded)?;
    Ok(loaded)
}
