//! `keyslot` – the relay process.
//!
//! ```text
//! keyslot          run the relay
//! keyslot init     write a default config to ~/.keyslot/config.toml
//! ```
//!
//! Running the relay:
//!
//! 1. Loads `~/.keyslot/config.toml` (or `$KEYSLOT_CONFIG`) plus `KEYSLOT_*`
//!    overrides.
//! 2. Starts the broker publisher supervisor.
//! 3. Optionally opens the serial color output.
//! 4. Serves the HTTP API until **Ctrl-C**, then drains requests and closes
//!    the broker session.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use keyslot_api::{ApiToken, AppState};
use keyslot_hal::SerialSender;
use keyslot_middleware::{BrokerPublisher, MqttConnector};
use keyslot_runtime::{RelayService, init_tracing};
use keyslot_types::KeyslotError;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

fn main() -> ExitCode {
    // Must run before the Tokio runtime exists.
    let _guard = init_tracing("keyslot");

    print_banner();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {}
        Some("init") => return init_config(),
        Some("-h" | "--help" | "help") => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Some(other) => {
            eprintln!("{} unknown command `{}`", "error:".red().bold(), other);
            print_usage();
            return ExitCode::FAILURE;
        }
    }

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if cfg.api_token.is_empty() {
        println!(
            "  {} api_token is empty; every authenticated request will be rejected.",
            "warning:".yellow().bold()
        );
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start Tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ Keyslot relay stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Relay failed".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config) -> Result<(), KeyslotError> {
    // ── Shutdown signal ───────────────────────────────────────────────────
    // The sender lives in an Arc so a failed handler install does not close
    // the channel, which receivers would read as a shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let ctrlc_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Broker publisher ──────────────────────────────────────────────────
    let connector = Arc::new(MqttConnector::new(
        cfg.mqtt_broker.clone(),
        cfg.mqtt_port,
        cfg.mqtt_client_id.clone(),
        cfg.mqtt_keep_alive_secs,
    ));
    let publisher = Arc::new(BrokerPublisher::new(connector, cfg.publisher_settings()));
    let supervisor = publisher.spawn(shutdown_rx.clone());
    println!(
        "  Broker   {}  topic {}",
        publisher.endpoint().bold(),
        publisher.topic().dimmed()
    );

    // ── Relay service ─────────────────────────────────────────────────────
    let mut relay = RelayService::new(Arc::clone(&publisher), cfg.relay_options());
    if let Some(settings) = cfg.serial_settings() {
        let sender = SerialSender::open(settings);
        println!(
            "  Serial   {} @ {} baud ({})",
            sender.settings().path.bold(),
            sender.settings().baud,
            if sender.is_open() { "open".green() } else { "unavailable".yellow() }
        );
        relay = relay.with_color_sender(Box::new(sender));
    }

    // ── HTTP API ──────────────────────────────────────────────────────────
    let listener = TcpListener::bind((cfg.api_host.as_str(), cfg.api_port))
        .await
        .map_err(|e| {
            KeyslotError::Transport(format!(
                "failed to bind {}:{}: {e}",
                cfg.api_host, cfg.api_port
            ))
        })?;
    println!(
        "  API      {}\n",
        format!("http://{}:{}", cfg.api_host, cfg.api_port).bold().cyan()
    );
    info!(config = ?cfg, "relay starting");

    let state = AppState::new(Arc::new(relay), ApiToken::new(cfg.api_token.as_str()));
    let served = keyslot_api::serve(listener, state, shutdown_rx).await;

    // Stop the supervisor even when the server failed on its own.
    shutdown_tx.send_replace(true);
    if let Err(e) = supervisor.await {
        warn!(error = %e, "broker supervisor task ended abnormally");
    }
    served
}

// ─────────────────────────────────────────────────────────────────────────────
// `keyslot init`
// ─────────────────────────────────────────────────────────────────────────────

fn init_config() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  Config already exists at {}; leaving it untouched.",
            path.display().to_string().bold()
        );
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), &path) {
        Ok(()) => {
            println!(
                "  {} Config written to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            println!("  Set {} before starting the relay.", "api_token".bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ __           __     __ "#.bold().cyan());
    println!("{}", r#"  / //_/__ __ __ _/ /__  / /_"#.bold().cyan());
    println!("{}", r#" / ,< / -_) // (_-< / _ \/ __/"#.bold().cyan());
    println!("{}", r#"/_/|_|\__/\_, /___/_/\___/\__/ "#.bold().cyan());
    println!("{}", r#"         /___/                "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Keyslot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Color/reward relay to the field device");
    println!();
}

fn print_usage() {
    println!("  Usage: keyslot [init]");
    println!();
    println!("    (none)   run the relay");
    println!("    init     write a default config to {}", config::config_path().display());
}
