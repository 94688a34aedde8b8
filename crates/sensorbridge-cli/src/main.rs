//! `sensorbridge` – streams device sensor telemetry to a rosbridge server.
//!
//! The binary:
//!
//! 1. Initialises tracing (and OTLP export when configured).
//! 2. Loads `~/.sensorbridge/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent and stdin is a terminal.  `SENSORBRIDGE_*` overrides
//!    apply in every case.
//! 3. Starts a session right away when an IPv4 address is given as the first
//!    argument.
//! 4. Drops the user into an **interactive REPL** (`/start`, `/stop`,
//!    `/status`, `/topics`, `/subscribe`, `/settings`, `/help`).
//! 5. Intercepts **Ctrl-C** to stop the running session and exit.

mod config;
mod repl;

use colored::Colorize;
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use sensorbridge_hal::sim::SimPlatform;
use sensorbridge_runtime::{SessionOrchestrator, init_tracing};

fn main() {
    // The guard flushes exported spans when main returns.
    let _otel_guard = init_tracing("sensorbridge");

    print_banner();

    let cfg = match config::startup() {
        config::Startup::Loaded(cfg) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        config::Startup::FirstRun(cfg) if std::io::stdin().is_terminal() => {
            run_first_run_wizard(cfg)
        }
        config::Startup::FirstRun(cfg) => {
            println!("  No configuration found; using defaults.");
            cfg
        }
        config::Startup::Fallback { cfg, error } => {
            println!("{}: {}", "Config error".red(), error);
            println!("  Using default configuration.");
            cfg
        }
    };

    // Built after init_tracing: the span exporter must not depend on it.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sensorbridge-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let handle = runtime.handle().clone();

    let platform = Arc::new(SimPlatform::new(cfg.simulation.rates()));
    let orchestrator: repl::SharedOrchestrator = Arc::new(tokio::sync::Mutex::new(
        SessionOrchestrator::new(cfg.session_config(), platform),
    ));

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let ctrlc_handle = handle.clone();
    let ctrlc_orchestrator = orchestrator.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping session …".yellow().bold());

        shutdown_clone.store(true, Ordering::SeqCst);
        let stopped = ctrlc_handle.block_on(async {
            ctrlc_orchestrator.lock().await.stop_session().await.is_some()
        });
        if stopped {
            println!("{}", "  ✓ Session stopped; connection closed.".green());
        }
        println!("{}", "  ✓ Exiting sensorbridge.".green());
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the session cleanly");
    }

    // ── Optional auto-start ───────────────────────────────────────────────
    if let Some(ip) = std::env::args().nth(1) {
        repl::cmd_start(&handle, &orchestrator, &cfg, Some(ip));
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shutdown, handle, orchestrator.clone(), cfg);

    runtime.block_on(async {
        orchestrator.lock().await.stop_session().await;
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for the essentials, seeded with `cfg`, and persist the answers.
fn run_first_run_wizard(mut cfg: config::Config) -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║    sensorbridge First-Run Wizard     ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up sensorbridge.\n");

    let port_str = prompt_line(
        &format!("  rosbridge WebSocket port [{}]: ", cfg.bridge_port),
        &cfg.bridge_port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.bridge_port = p;
    }

    let host = prompt_line("  Default rosbridge host (IPv4, optional): ", "");
    if !host.is_empty() {
        match sensorbridge_runtime::validate_address(&host) {
            Ok(ip) => cfg.default_host = Some(ip.to_string()),
            Err(e) => println!("  {} {}", "Warning:".yellow(), e),
        }
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    // The environment still wins over whatever was typed.
    cfg.with_env_overrides()
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____                          __         _     __         "#.bold().cyan());
    println!("{}", r#"  / __/__ ___  ___ ___  ____    / /  ____  (_)___/ /__ ____  "#.bold().cyan());
    println!("{}", r#" _\ \/ -_) _ \(_-</ _ \/ __/   / _ \/ __/ / / _  / _ `/ -_) "#.bold().cyan());
    println!("{}", r#"/___/\__/_//_/___/\___/_/     /_.__/_/   /_/\_,_/\_, /\__/  "#.bold().cyan());
    println!("{}", r#"                                                /___/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "sensorbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Device telemetry → rosbridge");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
