mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use plexus_core::event::TcpBroker;
use plexus_core::{Context, KernelConfig, Microkernel, Plugin};
use tokio_util::sync::CancellationToken;

// --- Bundled plugins for static registration ---
use core_heartbeat::HeartbeatPlugin;
use core_logging::LoggingPlugin;

use cli::{CliArgs, Commands, KernelArgs};

/// Errors surfaced to the user before exiting non-zero.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = core_logging::init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let outcome = match args.command {
        Some(Commands::Run { kernel, duration }) => run(kernel, duration.map(Duration::from_secs)).await,
        Some(Commands::Health { kernel }) => health(kernel).await,
        Some(Commands::Broker { listen }) => broker(&listen).await,
        None => {
            println!("No command given. Try `plexus --help`.");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config file (if any), then environment, then command-line overrides.
fn load_config(args: &KernelArgs) -> Result<KernelConfig, BoxError> {
    let mut config = match &args.config {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    if let Some(mode) = args.mode {
        config.bus.mode = mode;
    }
    if let Some(broker) = &args.broker {
        config.bus.broker_endpoint = Some(broker.clone());
    }
    Ok(config)
}

fn bundled_plugins(args: &KernelArgs) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(LoggingPlugin::new()),
        Arc::new(HeartbeatPlugin::new(Duration::from_millis(args.heartbeat_ms))),
    ]
}

async fn build_kernel(args: &KernelArgs) -> Result<Microkernel, BoxError> {
    let config = load_config(args)?;
    let kernel = Microkernel::from_config(config).await?;
    for plugin in bundled_plugins(args) {
        if kernel.config().plugins.is_enabled(plugin.name()) {
            kernel.register(plugin)?;
        } else {
            info!("Plugin '{}' disabled by configuration", plugin.name());
        }
    }
    Ok(kernel)
}

async fn print_health(kernel: &Microkernel, ctx: &Context) -> Result<(), BoxError> {
    let report = kernel.health_check(ctx).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(args: KernelArgs, duration: Option<Duration>) -> Result<(), BoxError> {
    let kernel = build_kernel(&args).await?;
    let ctx = Context::background();
    info!(
        "Starting '{}' in {} mode",
        kernel.config().service_name,
        kernel.config().bus.mode
    );

    let shutdown = async {
        if let Err(e) = print_health(&kernel, &ctx).await {
            error!("Failed to render health report: {}", e);
        }
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => wait_for_ctrl_c().await,
        }
        println!("Shutting down...");
    };
    kernel.run_until(&ctx, shutdown).await?;
    println!("Stopped cleanly.");
    Ok(())
}

async fn health(args: KernelArgs) -> Result<(), BoxError> {
    let kernel = build_kernel(&args).await?;
    let ctx = Context::background();
    kernel.start(&ctx).await?;
    let printed = print_health(&kernel, &ctx).await;
    let stop_ctx = Context::background().with_timeout(kernel.config().lifecycle.stop_timeout());
    kernel.stop(&stop_ctx).await?;
    printed
}

async fn broker(listen: &str) -> Result<(), BoxError> {
    let broker = TcpBroker::bind(listen).await?;
    println!("Broker listening on {}", broker.local_addr()?);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_ctrl_c().await;
        trigger.cancel();
    });
    broker.serve(shutdown).await?;
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        // Without a signal handler there is nothing left to wait for.
        std::future::pending::<()>().await;
    }
}
