//! `lanedrive-cli` – operator console for a lane-driving robot
//!
//! This binary is the operator's side of the robot's gateway.  It:
//!
//! 1. Checks for `~/.lanedrive/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Connects to the gateway and keeps the session alive, re-opening the
//!    sensor subscriptions after every reconnect.
//! 3. Drops the operator into an **interactive REPL** with slash-commands
//!    for driving, lane changes, goals and the sensor dashboard.
//! 4. Intercepts **Ctrl-C** to publish an emergency stop and close the
//!    session before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use lanedrive_middleware::{EventBus, Session, SessionHandle, WsConnector};
use lanedrive_runtime::{Advisory, Supervisor};
use lanedrive_types::{BridgeError, CommandIntent, Connectivity, GatewayEndpoint, SessionState};

/// How long shutdown waits for the close handshake.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() {
    // Logs go to stderr; the console itself uses stdout.
    let _otel_guard = lanedrive_runtime::init_tracing("lanedrive");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let (cfg, origin) = config::load_or_init(run_first_run_wizard);
    match origin {
        config::Origin::File => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        config::Origin::FirstRun => {}
        config::Origin::Fallback(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let session_config = match cfg.session_config() {
        Ok(session_config) => session_config,
        Err(e) => {
            println!("{}: {}", "Invalid gateway URI".red(), e);
            println!("  Fix it in {} and restart.", config::config_path().display());
            return;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    // ── Session, bus and supervisor ───────────────────────────────────────
    let supervisor = {
        let _entered = runtime.enter();
        let bus = EventBus::default();
        let events = bus.subscribe();
        let session = Session::spawn(session_config, Arc::new(WsConnector), Arc::new(bus));
        let supervisor = Supervisor::new(session, cfg.battery_low_percent);

        let (advisory_tx, advisory_rx) = mpsc::unbounded_channel();
        runtime.spawn(supervisor.clone().run(events, advisory_tx));
        runtime.spawn(print_advisories(advisory_rx, cfg.retry_delay_ms));
        supervisor
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    {
        let supervisor = supervisor.clone();
        let handle = runtime.handle().clone();
        // The REPL blocks on stdin, so the handler exits the process itself.
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
            handle.block_on(emergency_shutdown(&supervisor));
            println!("{}", "  ✓ Exiting lanedrive.".green());
            std::process::exit(130);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the robot");
        }
    }

    // ── Connect ───────────────────────────────────────────────────────────
    match runtime.block_on(supervisor.session().start()) {
        Ok(()) => println!("  Connecting to {} …", cfg.gateway_uri.yellow()),
        Err(e) => println!("{}: {}", "Connect failed".red(), e),
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut console = repl::Console {
        runtime: runtime.handle().clone(),
        supervisor,
        config: cfg,
    };
    repl::run(&mut console);

    runtime.block_on(wait_disconnected(console.supervisor.session()));
    info!("console exited");
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

async fn emergency_shutdown(supervisor: &Supervisor) {
    match supervisor.command(CommandIntent::EmergencyStop).await {
        Ok(()) => println!("{}", "  ✓ Emergency stop published.".green()),
        Err(BridgeError::NotConnected) => {
            println!("{}", "  – Not connected; no emergency stop sent.".dimmed())
        }
        Err(e) => println!("  {}: {}", "Emergency stop failed".red(), e),
    }
    if supervisor.session().stop().await.is_ok() {
        wait_disconnected(supervisor.session()).await;
    }
}

async fn wait_disconnected(session: &SessionHandle) {
    let mut state = session.watch_state();
    let closed = state.wait_for(|s| *s == SessionState::Disconnected);
    if tokio::time::timeout(SHUTDOWN_GRACE, closed).await.is_err() {
        warn!("gateway did not confirm the close in time");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Advisories
// ─────────────────────────────────────────────────────────────────────────────

async fn print_advisories(mut advisories: mpsc::UnboundedReceiver<Advisory>, retry_delay_ms: u64) {
    while let Some(advisory) = advisories.recv().await {
        let line = match advisory {
            Advisory::Connectivity(Connectivity::Connected) => {
                "● network: connected".green().to_string()
            }
            Advisory::Connectivity(Connectivity::Failed) => format!(
                "● network: connection failed, retrying in {:.1} s",
                retry_delay_ms as f64 / 1000.0
            )
            .yellow()
            .to_string(),
            Advisory::Connectivity(Connectivity::Closed) => "● network: closed".dimmed().to_string(),
            Advisory::LowBattery(percent) => {
                format!("⚠ battery low ({percent}%): robot halted, driving inhibited")
                    .red()
                    .bold()
                    .to_string()
            }
            Advisory::SendFailed(reason) => format!("✗ command not sent: {reason}").red().to_string(),
        };
        println!("\n  {line}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     lanedrive First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's point the console at your robot.\n");

    let mut cfg = config::Config::default();

    let uri = repl::prompt_str(
        &format!("  Gateway WebSocket URI [{}]: ", cfg.gateway_uri),
        &cfg.gateway_uri,
    );
    match GatewayEndpoint::parse(uri.as_str()) {
        Ok(_) => cfg.gateway_uri = uri,
        Err(e) => println!("  {} {}, using {}", "Warning:".yellow(), e, cfg.gateway_uri),
    }

    let threshold = repl::prompt_str(
        &format!("  Low-battery threshold in % [{}]: ", cfg.battery_low_percent),
        &cfg.battery_low_percent.to_string(),
    );
    match threshold.parse::<u8>() {
        Ok(p) if p <= 100 => cfg.battery_low_percent = p,
        _ => println!("  {} keeping {}%", "Warning:".yellow(), cfg.battery_low_percent),
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __                  __     _         "#.bold().cyan());
    println!("{}", r#"  / /__ ____  ___ ___/ /____(_)  _____  "#.bold().cyan());
    println!("{}", r#" / / _ `/ _ \/ -_) _  / __/ / |/ / -_) "#.bold().cyan());
    println!("{}", r#"/_/\_,_/_//_/\__/\_,_/_/ /_/|___/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "lanedrive".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Operator console for lane-driving robots");
    println!();
}
