use std::{path::PathBuf, sync::Arc, time::Duration};

use aiflow::{
    apps::{App, default_plugins},
    config::{CoordinatorConfig, FileConfigStore, resolve_root_dir},
    executor::TracingSurface,
    host::{InMemoryMenuApi, MenuApi},
    logger::{LogConfig, init_tracing},
    schema::write_schema,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use feature_plugin::{
    ConfigStore,
    message::{Request, Response},
    plugin::LogLevel,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "aiflow",
    about = "Coordinator for selection-driven page features",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the coordinator, one JSON request per stdin line, one reply per stdout line
    Run(RunArgs),

    /// Emit JSON-Schema for the wire types into `<root>/schemas`
    Schema,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Store file, instead of `<root>/store.json`
    #[arg(long)]
    store: Option<PathBuf>,

    /// Seconds an executor waits for the coordinator
    #[arg(long)]
    client_timeout: Option<u64>,

    /// Pretend the host has no context-menu API
    #[arg(long, default_value_t = false)]
    no_menu: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(resolve_root_dir(), args).await,
        Commands::Schema => {
            let out_dir = resolve_root_dir().join("schemas");
            let written = write_schema(&out_dir)?;
            println!("{} schemas written to {}", written.len(), out_dir.display());
            Ok(())
        }
    }
}

async fn run(root: PathBuf, args: RunArgs) -> anyhow::Result<()> {
    let mut config = CoordinatorConfig::from_env(root);
    if let Some(level) = args.log_level.as_deref() {
        config.log_level = LogLevel::from(level);
    }
    if let Some(store) = args.store {
        config.store_file = store;
    }
    if let Some(secs) = args.client_timeout {
        config.client_timeout = Duration::from_secs(secs);
    }

    init_tracing(&LogConfig::new(config.log_level, config.log_dir.clone()))?;
    info!("aiflow starting up with root {}", config.root.display());

    let store = ConfigStore::new(
        FileConfigStore::open(config.store_file.clone())
            .await
            .context("could not open the config store")?,
    );
    let menu_api: Option<Arc<dyn MenuApi>> = if args.no_menu {
        None
    } else {
        Some(InMemoryMenuApi::new())
    };
    let app = App::bootstrap(
        store,
        menu_api,
        Arc::new(TracingSurface),
        default_plugins()?,
        config.client_timeout,
    )
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Request>(&line) {
                    Ok(request) => app
                        .coordinator()
                        .call(request)
                        .await
                        .unwrap_or_else(|err| Response::fail(err.to_string())),
                    Err(err) => {
                        warn!("unreadable request: {err}");
                        Response::fail(format!("invalid request: {err}"))
                    }
                };
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
