//! REPL – interactive shell for sensorbridge.
//!
//! Supported slash-commands:
//!   /start [ip]         – stream to the rosbridge server at `ip`
//!   /stop               – stop the running session
//!   /status             – session and connection status
//!   /topics             – advertised topics and their message types
//!   /subscribe <topic>  – subscribe to an inbound topic (frames are logged)
//!   /settings           – interactively edit `~/.sensorbridge/config.toml`
//!   /help               – show this list
//!   /quit | /exit       – stop any session and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sensorbridge_middleware::TypeNaming;
use sensorbridge_runtime::{SessionOrchestrator, SessionStatus};
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::config::{self, Config};

pub type SharedOrchestrator = Arc<Mutex<SessionOrchestrator>>;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Help,
    Start(Option<String>),
    Stop,
    Status,
    Topics,
    Subscribe(String),
    Settings,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Command::Empty;
    };
    let arg = words.next().map(str::to_string);
    let extra = words.next().is_some();

    match head {
        "/help" => Command::Help,
        "/start" if extra => Command::Usage("/start [ip]"),
        "/start" => Command::Start(arg),
        "/stop" => Command::Stop,
        "/status" => Command::Status,
        "/topics" => Command::Topics,
        "/subscribe" => match arg {
            Some(topic) if !extra => Command::Subscribe(topic),
            _ => Command::Usage("/subscribe <topic>"),
        },
        "/settings" => Command::Settings,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>, handle: Handle, orchestrator: SharedOrchestrator, mut cfg: Config) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "sensorbridge>".bold().cyan());
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

        match parse_command(&line) {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::Start(ip) => cmd_start(&handle, &orchestrator, &cfg, ip),
            Command::Stop => cmd_stop(&handle, &orchestrator),
            Command::Status => cmd_status(&handle, &orchestrator),
            Command::Topics => cmd_topics(&handle, &orchestrator),
            Command::Subscribe(topic) => cmd_subscribe(&handle, &orchestrator, &topic),
            Command::Settings => cmd_settings(&handle, &orchestrator, &mut cfg),
            Command::Quit => {
                cmd_stop_quiet(&handle, &orchestrator);
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Usage(usage) => println!("{} {}", "Usage:".yellow(), usage.bold()),
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "sensorbridge Commands".bold().underline());
    println!("  {}         – stream to the rosbridge server at ip", "/start [ip]".bold().cyan());
    println!("  {}                – stop the running session", "/stop".bold().cyan());
    println!("  {}              – session and connection status", "/status".bold().cyan());
    println!("  {}              – advertised topics", "/topics".bold().cyan());
    println!("  {}  – subscribe to an inbound topic", "/subscribe <topic>".bold().cyan());
    println!("  {}            – edit ~/.sensorbridge/config.toml", "/settings".bold().cyan());
    println!("  {}         – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

/// Start a session, falling back to the configured default host.
pub fn cmd_start(handle: &Handle, orchestrator: &SharedOrchestrator, cfg: &Config, ip: Option<String>) {
    let Some(ip) = ip.or_else(|| cfg.default_host.clone()) else {
        println!(
            "{} {} (or set {} in settings)",
            "Usage:".yellow(),
            "/start <ip>".bold(),
            "default_host".bold()
        );
        return;
    };

    print!(
        "  {} {} … ",
        "Connecting to".bold(),
        format!("ws://{}:{}", ip, cfg.bridge_port).yellow()
    );
    io::stdout().flush().ok();

    handle.block_on(async {
        let mut orch = orchestrator.lock().await;
        match orch.start_session(&ip).await {
            Ok(()) => {
                println!("{}", "OK".green());
                if let Some(id) = orch.session_id() {
                    println!("  Session {}", id.to_string().dimmed());
                }
                for (kind, channels) in orch.live_sources() {
                    if channels.is_empty() {
                        println!("    {} {:<12} {}", "○".yellow(), kind.to_string(), "unavailable".dimmed());
                    } else {
                        let names: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
                        println!("    {} {:<12} {}", "●".green(), kind.to_string(), names.join(", "));
                    }
                }
                println!(
                    "  {} Streaming. Type {} to stop.",
                    "✓".green().bold(),
                    "/stop".bold()
                );
            }
            Err(e) => println!("{}: {}", "FAILED".red(), e),
        }
    });
}

fn cmd_stop(handle: &Handle, orchestrator: &SharedOrchestrator) {
    let stats = handle.block_on(async { orchestrator.lock().await.stop_session().await });
    match stats {
        Some(stats) => {
            println!("{}", "✓ Session stopped.".green());
            println!(
                "  readings {}  discarded {}  dropped {}",
                stats.readings, stats.discarded, stats.dropped
            );
        }
        None => println!("  {}", "No active session.".dimmed()),
    }
}

fn cmd_stop_quiet(handle: &Handle, orchestrator: &SharedOrchestrator) {
    handle.block_on(async {
        orchestrator.lock().await.stop_session().await;
    });
}

fn cmd_status(handle: &Handle, orchestrator: &SharedOrchestrator) {
    handle.block_on(async {
        let orch = orchestrator.lock().await;
        let status = orch.status();

        println!("{}", "Session Status".bold().underline());
        let label = match status {
            SessionStatus::Idle => status.to_string().dimmed(),
            SessionStatus::Active => status.to_string().green().bold(),
            SessionStatus::Degraded => status.to_string().yellow().bold(),
        };
        println!("  Status     : {}", label);
        println!("  Connection : {}", orch.bridge().state().to_string().yellow());

        if let (Some(id), Some(addr)) = (orch.session_id(), orch.address()) {
            println!("  Session    : {}", id.to_string().dimmed());
            println!("  Server     : ws://{}:{}", addr, orch.config().port);
        }
        if let Some(uptime) = orch.uptime() {
            println!("  Uptime     : {}s", uptime.as_secs());
        }
        if let Some(stats) = orch.stats() {
            println!(
                "  Published  : imu {}  gps {}  odom {}  steps {}",
                stats.imu, stats.nav_sat_fix, stats.odometry, stats.step_count
            );
            println!(
                "  Readings   : {}  (discarded {}, dropped {})",
                stats.readings, stats.discarded, stats.dropped
            );
        }
        if status == SessionStatus::Degraded {
            println!(
                "  {} transport dropped; {} and {} again to reconnect.",
                "Warning:".yellow(),
                "/stop".bold(),
                "/start".bold()
            );
        }
    });
}

fn cmd_topics(handle: &Handle, orchestrator: &SharedOrchestrator) {
    handle.block_on(async {
        let orch = orchestrator.lock().await;
        let naming = orch.config().type_naming;
        println!("{}", "Advertised Topics".bold().underline());
        for topic in orch.topics() {
            println!("  {:<14} {}", topic.name().bold(), topic.ros_type(naming).dimmed());
        }
    });
}

fn cmd_subscribe(handle: &Handle, orchestrator: &SharedOrchestrator, topic: &str) {
    let result = handle.block_on(async { orchestrator.lock().await.subscribe(topic) });
    match result {
        Ok(()) => println!(
            "{} {} (inbound frames are logged)",
            "✓ Subscribed to".green(),
            topic.bold()
        ),
        Err(e) => println!("{}: {}", "Subscribe failed".red(), e),
    }
}

fn cmd_settings(handle: &Handle, orchestrator: &SharedOrchestrator, cfg: &mut Config) {
    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value)");

    cfg.bridge_port = prompt_u16(&format!("  Bridge port          [{}]: ", cfg.bridge_port), cfg.bridge_port);

    let current_host = cfg.default_host.clone().unwrap_or_default();
    let host = prompt_str(&format!("  Default host         [{}]: ", current_host), &current_host);
    cfg.default_host = if host.is_empty() { None } else { Some(host) };

    cfg.connect_timeout_ms = prompt_u64(
        &format!("  Connect timeout (ms) [{}]: ", cfg.connect_timeout_ms),
        cfg.connect_timeout_ms,
    );
    cfg.settle_delay_ms = prompt_u64(
        &format!("  Settle delay (ms)    [{}]: ", cfg.settle_delay_ms),
        cfg.settle_delay_ms,
    );

    let naming = prompt_str(
        &format!("  Type naming (ros1 / ros2) [{}]: ", cfg.type_naming),
        &cfg.type_naming.to_string(),
    );
    cfg.type_naming = match naming.to_lowercase().as_str() {
        "ros2" => TypeNaming::Ros2,
        _ => TypeNaming::Ros1,
    };

    match config::save(cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    let active = handle.block_on(async {
        let mut orch = orchestrator.lock().await;
        orch.set_config(cfg.session_config());
        orch.is_active()
    });
    if active {
        println!("  {}", "Changes apply to the next session.".dimmed());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a u16 value.  Returns `default` when the user presses Enter.
fn prompt_u16(msg: &str, default: u16) -> u16 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid port number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

fn prompt_u64(msg: &str, default: u64) -> u64 {
    let raw = prompt_str(msg, &default.to_string());
    raw.parse::<u64>().unwrap_or_else(|_| {
        println!("  {} '{}' is not a number, keeping {}", "Warning:".yellow(), raw, default);
        default
    })
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
fn prompt_str(msg: &str, default: &str) -> String {
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
