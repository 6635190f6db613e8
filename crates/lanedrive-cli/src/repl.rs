//! REPL – the operator console.
//!
//! Supported slash-commands:
//!   /help                  – show this list
//!   /connect, /disconnect  – start or stop the gateway session
//!   /start, /stop          – drive or halt (`/cmd_drive`)
//!   /up, /down             – speed up or slow down (`/cmd_drive`)
//!   /left, /right          – lane change (`/lane_change_cmd`)
//!   /lane <direction>      – lane change by name (left, right)
//!   /drive <word>          – raw `/cmd_drive` word (start, stop, up, down, emergency)
//!   /estop                 – emergency stop (`/emergency_stop`)
//!   /vel <linear> <angular> – velocity command (`/cmd_vel`)
//!   /goal <x> <y> <yaw>    – navigation goal (`/goal_pose`)
//!   /status                – connection and sensor dashboard
//!   /settings              – edit `~/.lanedrive/config.toml`
//!   /quit | /exit          – stop the session and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use tokio::runtime::Handle;

use lanedrive_runtime::Supervisor;
use lanedrive_types::{
    BridgeError, CommandIntent, DriveCommand, GatewayEndpoint, LaneDirection, SessionState,
};

use crate::config::{self, Config};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Connect,
    Disconnect,
    Send(CommandIntent),
    Status,
    Settings,
    Quit,
}

/// Parse a console line.  The error string is shown to the operator as is.
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let command = match head {
        "/help" => ReplCommand::Help,
        "/connect" => ReplCommand::Connect,
        "/disconnect" => ReplCommand::Disconnect,
        "/status" => ReplCommand::Status,
        "/settings" => ReplCommand::Settings,
        "/quit" | "/exit" => ReplCommand::Quit,
        "/start" => ReplCommand::Send(CommandIntent::Drive(DriveCommand::Start)),
        "/stop" => ReplCommand::Send(CommandIntent::Drive(DriveCommand::Stop)),
        "/up" => ReplCommand::Send(CommandIntent::Drive(DriveCommand::SpeedUp)),
        "/down" => ReplCommand::Send(CommandIntent::Drive(DriveCommand::SpeedDown)),
        "/left" => ReplCommand::Send(CommandIntent::LaneChange(LaneDirection::Left)),
        "/right" => ReplCommand::Send(CommandIntent::LaneChange(LaneDirection::Right)),
        "/estop" => ReplCommand::Send(CommandIntent::EmergencyStop),
        "/drive" => {
            let [word] = expect_args::<1>(head, &args, "<start|stop|up|down|emergency>")?;
            let command = DriveCommand::from_str(word).map_err(|e| e.to_string())?;
            ReplCommand::Send(CommandIntent::Drive(command))
        }
        "/lane" => {
            let [word] = expect_args::<1>(head, &args, "<left|right>")?;
            let direction = LaneDirection::from_str(word).map_err(|e| e.to_string())?;
            ReplCommand::Send(CommandIntent::LaneChange(direction))
        }
        "/vel" => {
            let [linear, angular] = expect_args::<2>(head, &args, "<linear> <angular>")?;
            ReplCommand::Send(CommandIntent::Velocity {
                linear: parse_number("linear", linear)?,
                angular: parse_number("angular", angular)?,
            })
        }
        "/goal" => {
            let [x, y, yaw] = expect_args::<3>(head, &args, "<x> <y> <yaw_rad>")?;
            ReplCommand::Send(CommandIntent::GoalPose {
                x: parse_number("x", x)?,
                y: parse_number("y", y)?,
                yaw: parse_number("yaw", yaw)?,
            })
        }
        other => return Err(format!("unknown command '{other}'")),
    };

    if !args.is_empty() && !matches!(head, "/drive" | "/lane" | "/vel" | "/goal") {
        return Err(format!("{head} takes no arguments"));
    }
    Ok(command)
}

fn expect_args<'a, const N: usize>(
    head: &str,
    args: &[&'a str],
    usage: &str,
) -> Result<[&'a str; N], String> {
    <[&str; N]>::try_from(args).map_err(|_| format!("usage: {head} {usage}"))
}

fn parse_number(name: &str, raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("{name}: '{raw}' is not a number")),
    }
}

/// Everything the console needs to act on a command.
pub struct Console {
    pub runtime: Handle,
    pub supervisor: Supervisor,
    pub config: Config,
}

/// Entry point for the interactive REPL. Returns on `/quit` or EOF.
pub fn run(console: &mut Console) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "lanedrive>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{} {}. Type {} for available commands.", "✗".red(), e, "/help".bold());
                continue;
            }
        };

        match command {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Connect => cmd_connect(console),
            ReplCommand::Disconnect => cmd_disconnect(console),
            ReplCommand::Send(intent) => cmd_send(console, intent),
            ReplCommand::Status => cmd_status(console),
            ReplCommand::Settings => cmd_settings(console),
            ReplCommand::Quit => {
                cmd_disconnect(console);
                println!("{}", "Goodbye.".green());
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "lanedrive Commands".bold().underline());
    println!("  {}  – connect to / leave the gateway", "/connect  /disconnect".bold().cyan());
    println!("  {}            – start or stop driving", "/start  /stop".bold().cyan());
    println!("  {}              – speed up or slow down", "/up  /down".bold().cyan());
    println!("  {}          – change lane", "/left  /right".bold().cyan());
    println!("  {}     – change lane by name (left, right)", "/lane <direction>".bold().cyan());
    println!("  {}          – raw drive word (start, stop, up, down, emergency)", "/drive <word>".bold().cyan());
    println!("  {}                 – emergency stop", "/estop".bold().cyan());
    println!("  {} – velocity command", "/vel <linear> <angular>".bold().cyan());
    println!("  {}    – navigation goal", "/goal <x> <y> <yaw>".bold().cyan());
    println!("  {}                – connection and sensor dashboard", "/status".bold().cyan());
    println!("  {}              – edit ~/.lanedrive/config.toml", "/settings".bold().cyan());
    println!("  {}           – exit the console", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_connect(console: &Console) {
    let session = console.supervisor.session();
    if session.state() != SessionState::Disconnected {
        println!("  Session already {}.", session.state().to_string().yellow());
        return;
    }
    match console.runtime.block_on(session.start()) {
        Ok(()) => println!(
            "  {} {} …",
            "Connecting to".bold(),
            console.config.gateway_uri.yellow()
        ),
        Err(e) => println!("{}: {}", "Connect failed".red(), e),
    }
}

fn cmd_disconnect(console: &Console) {
    let session = console.supervisor.session();
    if session.state() == SessionState::Disconnected {
        return;
    }
    match console.runtime.block_on(session.stop()) {
        Ok(()) => println!("  {}", "Session stopping.".green()),
        Err(e) => println!("{}: {}", "Disconnect failed".red(), e),
    }
}

fn cmd_send(console: &Console, intent: CommandIntent) {
    let topic = intent.topic();
    match console.runtime.block_on(console.supervisor.command(intent)) {
        Ok(()) => println!("  {} {}", "✓ sent on".green(), topic.bold()),
        Err(BridgeError::NotConnected) => {
            println!("  {} Use {} first.", "Not connected.".yellow(), "/connect".bold())
        }
        Err(BridgeError::InvalidCommand(reason)) => println!("  {} {}", "Refused:".red(), reason),
        Err(e) => println!("  {}: {}", "Send failed".red(), e),
    }
}

fn cmd_status(console: &Console) {
    let session = console.supervisor.session();
    println!("{}", "Status".bold().underline());
    println!("  gateway: {} ({})", console.config.gateway_uri.bold(), session.state());
    for line in console.supervisor.render() {
        println!("  {line}");
    }
    if !console.supervisor.drive_permitted() {
        println!("  {}", "driving inhibited: battery low".red().bold());
    }
}

fn cmd_settings(console: &mut Console) {
    let mut cfg = console.config.clone();

    println!("{}", "Settings Editor".bold().underline());
    let uri = prompt_str(&format!("  Gateway URI        [{}]: ", cfg.gateway_uri), &cfg.gateway_uri);
    match GatewayEndpoint::parse(uri.as_str()) {
        Ok(_) => cfg.gateway_uri = uri,
        Err(e) => println!("  {} {}, keeping {}", "Warning:".yellow(), e, cfg.gateway_uri),
    }

    cfg.retry_delay_ms = prompt_parsed(
        &format!("  Retry delay (ms)   [{}]: ", cfg.retry_delay_ms),
        cfg.retry_delay_ms,
    );

    let threshold = prompt_parsed(
        &format!("  Low battery (%)    [{}]: ", cfg.battery_low_percent),
        cfg.battery_low_percent,
    );
    if threshold <= 100 {
        cfg.battery_low_percent = threshold;
    } else {
        println!("  {} threshold must be 0–100, keeping {}", "Warning:".yellow(), cfg.battery_low_percent);
    }

    match config::save(&cfg) {
        Ok(()) => {
            println!(
                "{} {}",
                "✓ Settings saved to".green(),
                config::config_path().display().to_string().bold()
            );
            println!("  Changes take effect the next time the console starts.");
            console.config = cfg;
        }
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a parseable value.  Returns `default` on Enter or bad input.
fn prompt_parsed<T: FromStr + std::fmt::Display + Copy>(msg: &str, default: T) -> T {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not valid, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}
