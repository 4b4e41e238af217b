//! Botster Push CLI - manage this device's push notification subscription.
//!
//! See the `botster_push` library for the core functionality.

use anyhow::{Context, Result};
use botster_push::{
    Config, Divergence, EngineSnapshot, HttpBackend, LocalPlatform, PromptController, PromptMode,
    PromptVisibility, ReconciliationEngine, SubscriptionRegistrar, TokenLookup,
};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "botster-push")]
#[command(version)]
#[command(about = "Manage push notification subscriptions for this device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the reconciled subscription state
    Status {
        /// Print the engine snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Subscribe this device (asks for permission if needed)
    Enable,
    /// Unsubscribe this device
    Disable,
    /// Print the server's VAPID public key
    VapidKey,
    /// Re-send a local registration the server has lost
    Repair,
    /// Run the one-time enable prompt
    Prompt,
}

/// Wire platform, backend and tokens from config and environment.
async fn start_engine(config: &Config) -> Result<Arc<ReconciliationEngine>> {
    let platform = LocalPlatform::open(
        Config::platform_state_dir()?,
        config.push_service_url.clone(),
        config.permission_policy,
    )?;
    let backend = HttpBackend::new(config.server_url.clone(), config.http_timeout())
        .context("Failed to build HTTP client")?;
    let tokens = TokenLookup::from_environment()?;

    let registrar = Arc::new(SubscriptionRegistrar::new(
        Arc::new(platform),
        Arc::new(backend),
        Arc::new(tokens),
    ));
    registrar.initialize().await;

    let engine = ReconciliationEngine::start(registrar);
    settled(&engine).await?;
    Ok(engine)
}

async fn settled(engine: &ReconciliationEngine) -> Result<EngineSnapshot> {
    let mut rx = engine.subscribe();
    let snap = rx
        .wait_for(EngineSnapshot::is_settled)
        .await
        .context("Subscription engine stopped")?;
    Ok(snap.clone())
}

fn print_status(snap: &EngineSnapshot) {
    println!("State:       {}", snap.state);
    println!("Permission:  {}", snap.permission);
    if let Some(has_local) = snap.has_local {
        println!("Local:       {}", if has_local { "registered" } else { "none" });
    }
    if let Some(server) = snap.server {
        println!("Server:      {} subscription(s)", server.count);
    }
    match snap.divergence() {
        Divergence::None => {}
        Divergence::LocalOnly => {
            println!();
            println!("This device is registered but the server has no record of it.");
            println!("Run `botster-push repair` to re-send the registration.");
        }
        Divergence::ServerOnly => {
            println!();
            println!("The server lists a subscription this device no longer holds.");
            println!("Run `botster-push enable` to register this device again.");
        }
    }
}

fn ask_yes_no(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn run_prompt(engine: Arc<ReconciliationEngine>, config: &Config) -> Result<bool> {
    let settle = config.prompt_settle_delay();
    let controller = PromptController::mount(Arc::clone(&engine), settle);
    let mut visibility = controller.watch();

    // Probes are done, so the prompt either shows within the settle delay
    // or stays hidden.
    let limit = settle.saturating_mul(2).max(Duration::from_secs(1));
    let visible = visibility.wait_for(|v| v.is_visible());
    let shown = tokio::time::timeout(limit, visible).await;
    let mode = match shown {
        Ok(Ok(v)) => match *v {
            PromptVisibility::Visible(mode) => mode,
            _ => return Ok(true),
        },
        _ => {
            println!("Nothing to ask: notifications are {}.", engine.snapshot().state);
            return Ok(true);
        }
    };

    match mode {
        PromptMode::ExplainOnly => {
            println!("Notifications are blocked for botster on this device.");
            println!("Allow them in your platform settings, then run `botster-push enable`.");
            controller.dismiss();
            Ok(true)
        }
        PromptMode::Full => {
            let yes = tokio::task::spawn_blocking(|| {
                ask_yes_no("Get notified when your agents need attention?")
            })
            .await??;
            if !yes {
                controller.dismiss();
                return Ok(true);
            }

            let mut snapshots = engine.subscribe();
            controller.accept();
            let snap = snapshots
                .wait_for(|s| !s.loading && (s.is_subscribed() || s.last_error.is_some()))
                .await
                .context("Subscription engine stopped")?
                .clone();
            Ok(report_enable(&snap))
        }
    }
}

fn report_enable(snap: &EngineSnapshot) -> bool {
    if snap.is_subscribed() {
        println!("Notifications enabled.");
        true
    } else {
        eprintln!(
            "Could not enable notifications: {}",
            snap.last_error.as_deref().unwrap_or("unknown error")
        );
        false
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Log to BOTSTER_LOG_FILE when set, stderr otherwise
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    logger.format_timestamp_secs();
    if let Ok(path) = std::env::var("BOTSTER_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        logger.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    logger.init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let ok = match cli.command {
        Commands::Status { json } => {
            let engine = start_engine(&config).await?;
            let snap = engine.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snap)?);
            } else {
                print_status(&snap);
            }
            true
        }
        Commands::Enable => {
            let engine = start_engine(&config).await?;
            engine.enable_notifications().await;
            report_enable(&engine.snapshot())
        }
        Commands::Disable => {
            let engine = start_engine(&config).await?;
            let ok = engine.disable_notifications().await;
            if ok {
                println!("Notifications disabled.");
            } else if let Some(message) = engine.snapshot().last_error {
                eprintln!("Could not remove the local registration: {message}");
            }
            ok
        }
        Commands::VapidKey => {
            let engine = start_engine(&config).await?;
            match engine.registrar().fetch_vapid_key().await {
                Some(key) => {
                    println!("{key}");
                    true
                }
                None => {
                    eprintln!("Server did not provide a VAPID public key");
                    false
                }
            }
        }
        Commands::Repair => {
            let engine = start_engine(&config).await?;
            if engine.repair().await {
                println!("Registration re-sent to server.");
                true
            } else {
                let snap = engine.snapshot();
                match snap.last_error {
                    Some(message) => {
                        eprintln!("Repair failed: {message}");
                        false
                    }
                    None => {
                        println!("Nothing to repair ({}).", snap.state);
                        true
                    }
                }
            }
        }
        Commands::Prompt => {
            let engine = start_engine(&config).await?;
            run_prompt(engine, &config).await?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
