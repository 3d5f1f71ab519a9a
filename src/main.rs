use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use component_lifecycle::{
    api,
    client::LifecycleClient,
    config::{get_config_path, Config},
    models::*,
    notify::{DispatchNotifier, FnObserver},
    orchestrator::{FeatureLifecycleOrchestrator, ToggleOutcome, TransitionPhase},
    process::OdoCli,
    progress::ProgressHost,
    registry::ComponentRegistry,
    state::FeatureState,
    tree_render::component_status,
};

#[derive(Parser)]
#[command(name = "clc")]
#[command(about = "Start and stop dev/debug sessions of odo components")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP control server
    Serve {
        /// Port for HTTP API (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Namespaces to create at startup
        #[arg(short, long)]
        namespace: Vec<String>,
    },
    /// Toggle a feature locally and stay attached while it runs
    Toggle {
        #[command(flatten)]
        target: Target,

        /// dev, dev-on-podman, debug or debug-on-podman
        feature: String,

        /// Launch base features as requested instead of in debug mode
        #[arg(long)]
        no_debug: bool,
    },
    /// Show what odo reports for a component
    Status {
        #[command(flatten)]
        target: Target,
    },
    /// Print the effective configuration
    Config {
        /// Save it to the config file, keeping environment overrides
        #[arg(long)]
        write: bool,
    },
    /// Drive a running server
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
}

#[derive(Args)]
struct Target {
    /// Cluster namespace of the component
    #[arg(short, long)]
    namespace: String,

    /// Component name
    #[arg(long)]
    name: String,

    /// Component working directory
    #[arg(long, default_value = ".")]
    path: PathBuf,
}

#[derive(Subcommand)]
enum RemoteCommand {
    /// Print the namespace tree
    Tree,
    /// Register a component
    Add {
        namespace: String,
        name: String,
        path: PathBuf,
    },
    /// Toggle a feature of a registered component
    Toggle {
        namespace: String,
        name: String,
        feature: String,
    },
    /// List running tasks
    Tasks,
    /// Cancel a running task
    Cancel { id: uuid::Uuid },
}

/// Initialize tracing with output to stderr (for one-shot commands) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "component_lifecycle=debug,tower_http=debug".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn parse_feature(feature: &str) -> anyhow::Result<ComponentFeature> {
    ComponentFeature::from_str(feature).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown feature '{}', expected one of dev, dev-on-podman, debug, debug-on-podman",
            feature
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep stdout for command output outside of the server
    let use_stderr = !matches!(cli.command, None | Some(Commands::Serve { .. }));
    init_tracing(use_stderr);

    let config = Config::load();

    match cli.command {
        Some(Commands::Serve { port, namespace }) => {
            serve(config, port, namespace).await?;
        }
        Some(Commands::Toggle {
            target,
            feature,
            no_debug,
        }) => {
            let mut config = config;
            if no_debug {
                config.debug_by_default = false;
            }
            toggle(config, target, parse_feature(&feature)?).await?;
        }
        Some(Commands::Status { target }) => {
            status(config, target).await?;
        }
        Some(Commands::Config { write }) => {
            show_config(&config, write)?;
        }
        Some(Commands::Remote { command }) => {
            remote(command).await?;
        }
        None => {
            serve(config, None, Vec::new()).await?;
        }
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>, namespaces: Vec<String>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.port);
    tracing::info!("Starting component lifecycle server on port {}", port);

    let odo = OdoCli::new(config.odo_settings());
    let state = FeatureState::new();
    let notifier = DispatchNotifier::spawn();
    let tree_state = state.clone();
    notifier.register(Arc::new(FnObserver::new("tree", move |key: &ComponentKey| {
        tracing::debug!("{} is now {}", key, component_status(&tree_state.features(key)));
        Ok(())
    })));

    let orchestrator =
        FeatureLifecycleOrchestrator::new(Arc::new(odo.clone()), state, Arc::new(notifier))
            .with_policy(config.start_policy());

    let registry = ComponentRegistry::new();
    for namespace in &namespaces {
        registry.ensure_namespace(namespace);
    }

    let app = api::create_router(api::AppState {
        registry,
        orchestrator,
        progress: ProgressHost::new(),
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    tracing::info!(
        "Component lifecycle server listening on http://127.0.0.1:{}",
        port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    odo.interrupt_all();
    Ok(())
}

/// Toggle once; if a session was started, stay attached until it ends and
/// stop it on Ctrl-C.
async fn toggle(config: Config, target: Target, feature: ComponentFeature) -> anyhow::Result<()> {
    let path = std::fs::canonicalize(&target.path)
        .with_context(|| format!("Failed to resolve {}", target.path.display()))?;
    let component = Component::new(
        ComponentKey::new(target.namespace, target.name, path),
        ComponentInfo {
            component_type: None,
            supported_features: vec![FeatureMode::Dev, FeatureMode::Debug],
        },
    );

    let odo = OdoCli::new(config.odo_settings());
    let state = FeatureState::new();
    let notifier = DispatchNotifier::spawn();
    let mut changes = notifier.subscribe();
    let printed_state = state.clone();
    notifier.register(Arc::new(FnObserver::new("stdout", move |key: &ComponentKey| {
        println!("{} ({})", key, component_status(&printed_state.features(key)));
        Ok(())
    })));

    let orchestrator = FeatureLifecycleOrchestrator::new(Arc::new(odo), state, Arc::new(notifier))
        .with_policy(config.start_policy());

    let outcome = orchestrator
        .toggle(&component, feature)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let launched = match outcome {
        ToggleOutcome::Stopped => {
            println!("{} stopped on {}", feature.label(), component.key);
            return Ok(());
        }
        ToggleOutcome::Starting { launched } => launched,
    };
    println!(
        "{} on {}, press Ctrl-C to stop",
        launched.action_label(false),
        component.key
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}...", feature.action_label(true));
                match orchestrator.toggle(&component, feature).await {
                    Ok(_) => break,
                    Err(e) => eprintln!("{}", e.user_message()),
                }
            }
            changed = changes.recv() => {
                if changed.is_err() {
                    break;
                }
                if orchestrator.phase(&component.key, feature) == TransitionPhase::Stopped {
                    println!("{} on {} ended", launched.label(), component.key);
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn status(config: Config, target: Target) -> anyhow::Result<()> {
    let odo = OdoCli::new(config.odo_settings());
    let key = ComponentKey::new(target.namespace, target.name, target.path);
    let description = odo
        .describe(&key)
        .await
        .map_err(|e| anyhow::anyhow!("Error: {}", e))?;

    println!("{}", key);
    for platform in [Platform::Cluster, Platform::Podman] {
        let running = if description.dev_running_on(platform) {
            "running"
        } else {
            "not running"
        };
        println!("  dev on {}: {}", platform.label(), running);
    }
    let modes: Vec<_> = description
        .supported_modes()
        .iter()
        .map(|m| m.as_str())
        .collect();
    println!("  supported: {}", modes.join(", "));
    if let Some(devfile) = &description.devfile_path {
        println!("  devfile: {}", devfile);
    }
    Ok(())
}

fn show_config(config: &Config, write: bool) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if write {
        config.save()?;
        println!("Saved to {}", get_config_path()?.display());
    }
    Ok(())
}

async fn remote(command: RemoteCommand) -> anyhow::Result<()> {
    let client = LifecycleClient::from_env();
    match command {
        RemoteCommand::Tree => {
            print!("{}", client.tree().await?);
        }
        RemoteCommand::Add {
            namespace,
            name,
            path,
        } => {
            let component = client
                .create_component(
                    &namespace,
                    &CreateComponentInput {
                        name,
                        path,
                        component_type: None,
                        supported_features: None,
                    },
                )
                .await?;
            println!("Registered {}", component.key);
        }
        RemoteCommand::Toggle {
            namespace,
            name,
            feature,
        } => {
            let response = client
                .toggle(&namespace, &name, parse_feature(&feature)?)
                .await?;
            match response.outcome {
                ToggleOutcome::Starting { launched } => {
                    println!("{} is starting on {}", launched.label(), response.component)
                }
                ToggleOutcome::Stopped => {
                    println!("{} stopped on {}", response.feature.label(), response.component)
                }
            }
        }
        RemoteCommand::Tasks => {
            for task in client.list_tasks().await? {
                println!("{}  {}  {}", task.id, task.started_at.to_rfc3339(), task.label);
            }
        }
        RemoteCommand::Cancel { id } => {
            client.cancel_task(id).await?;
            println!("Cancelled {}", id);
        }
    }
    Ok(())
}
