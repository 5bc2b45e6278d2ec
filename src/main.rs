//! Numpad Mouse
//!
//! Main entry point: grab numpad keyboards and drive a virtual mouse.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use numpad_mouse::capture::{self, KeyboardCapture};
use numpad_mouse::config::{Config, ConfigProvider, ConfigStore};
use numpad_mouse::dispatch::HotkeyDispatcher;
use numpad_mouse::uinput::UinputMouse;

#[derive(Parser)]
#[command(name = "numpad-mouse")]
#[command(about = "Control the mouse pointer and wheel from the numpad")]
struct Cli {
    /// Config file path (default: ~/.config/numpad-mouse/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keyboard device to grab (repeatable; default: every keyboard with a numpad)
    #[arg(short, long)]
    device: Vec<PathBuf>,

    /// Start with mouse mode enabled
    #[arg(long)]
    enabled: bool,

    /// Print the default config as TOML and exit
    #[arg(long)]
    print_default_config: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", toml::to_string_pretty(&Config::default())?);
        return Ok(());
    }

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    info!("Loading config from {:?}", config_path);
    let store = Arc::new(ConfigStore::open(&config_path)?);
    if !config_path.exists() {
        store.save().context("Failed to write default config")?;
        info!("Wrote default config to {:?}", config_path);
    }

    let mouse = UinputMouse::new().context("Failed to create virtual mouse")?;
    info!("Created virtual mouse: {}", mouse.name());
    if let Some(path) = mouse.device_path() {
        info!("Device path: {}", path.display());
    }

    let config: Arc<dyn ConfigProvider> = store;
    let dispatcher = HotkeyDispatcher::new(Arc::new(mouse), config);
    dispatcher.set_enabled(cli.enabled);

    let paths = if cli.device.is_empty() {
        capture::find_keyboards()
    } else {
        cli.device
    };
    let mut keyboards = KeyboardCapture::open(&paths)?;

    let running = setup_interrupt_handler();
    info!("Entering main loop. Press Ctrl+C (or send SIGTERM) to exit.");
    let result = keyboards.run(&dispatcher, &running);

    dispatcher.shutdown();
    info!("Stopped");
    result
}

/// Set up a SIGINT/SIGTERM handler that clears the returned flag when triggered.
fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();

    running
}
