/*!
# xarmctl

Command-line front end for xArm servo controllers connected over USB HID or
a serial port.

## Usage

### Read the battery
```bash
xarmctl battery
```

### Move a servo and read positions back
```bash
xarmctl move 3 500 --duration 1000 --wait
xarmctl position 1 2 3 --degrees
```

### Poll all six servos at 100 Hz
```bash
xarmctl monitor --iterations 100 --interval-ms 10
```

### Try it without hardware
```bash
xarmctl --simulate monitor
```
*/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use xarm::controller::ALL_SERVOS;
use xarm::sim::{SimConnector, SimulatedArm};
use xarm::{Controller, Servo};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "xarmctl")]
#[command(about = "Control and monitor xArm servo controllers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "xarmctl.toml")]
    config: PathBuf,

    /// Transport designator ("USB" or a "COM…" port), overrides the config file
    #[arg(short, long)]
    device: Option<String>,

    /// Trace every sent and received payload
    #[arg(long)]
    debug: bool,

    /// Talk to an in-process simulated arm instead of hardware
    #[arg(long)]
    simulate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the battery voltage
    Battery,

    /// Read servo positions
    Position {
        /// Servo ids (1-6), all six if omitted
        ids: Vec<u8>,

        /// Report degrees instead of raw units
        #[arg(long)]
        degrees: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Move one servo to a raw position (0-1000)
    Move {
        id: u8,

        #[arg(allow_negative_numbers = true)]
        position: i32,

        /// Move duration in milliseconds
        #[arg(long)]
        duration: Option<u16>,

        /// Block until the move should be finished
        #[arg(long)]
        wait: bool,
    },

    /// Move one servo to an angle in degrees (-120 to 120)
    MoveAngle {
        id: u8,

        #[arg(allow_negative_numbers = true)]
        degrees: f32,

        /// Move duration in milliseconds
        #[arg(long)]
        duration: Option<u16>,

        /// Block until the move should be finished
        #[arg(long)]
        wait: bool,
    },

    /// Release holding torque (all six servos if no ids are given)
    Off {
        ids: Vec<u8>,
    },

    /// Poll all six positions at a fixed rate
    Monitor {
        #[arg(long)]
        iterations: Option<u32>,

        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Generate a default configuration file
    Config {
        /// Output configuration file path
        #[arg(short, long, default_value = "xarmctl.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log to stderr so stdout carries only command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    if let Commands::Config { output } = &cli.command {
        return generate_config_file(output);
    }

    let mut config = load_config(&cli.config);
    if let Some(device) = &cli.device {
        config.cli.device = device.clone();
    }
    config.controller.debug |= cli.debug;

    let mut controller = open_controller(&config, cli.simulate)?;

    match cli.command {
        Commands::Battery => {
            let volts = controller.battery_voltage()?;
            println!("🔋 Battery: {:.2} V", volts);
        }

        Commands::Position { ids, degrees, json } => {
            let ids = if ids.is_empty() { ALL_SERVOS.to_vec() } else { ids };
            print_positions(&mut controller, &ids, degrees, json)?;
        }

        Commands::Move { id, position, duration, wait } => {
            let duration = duration.unwrap_or(config.cli.move_duration_ms);
            controller
                .set_position(id, position, duration, wait)
                .with_context(|| format!("Failed to move servo {}", id))?;
            println!("✅ Servo {} -> {} over {} ms", id, position, duration);
        }

        Commands::MoveAngle { id, degrees, duration, wait } => {
            let duration = duration.unwrap_or(config.cli.move_duration_ms);
            controller
                .set_angle(id, degrees, duration, wait)
                .with_context(|| format!("Failed to move servo {}", id))?;
            println!("✅ Servo {} -> {:.1}° over {} ms", id, degrees, duration);
        }

        Commands::Off { ids } => {
            if ids.is_empty() {
                controller.servo_off_all()?;
                println!("✅ All servos released");
            } else {
                controller.servo_off_many(&ids)?;
                println!("✅ Servos {:?} released", ids);
            }
        }

        Commands::Monitor { iterations, interval_ms } => {
            let iterations = iterations.unwrap_or(config.cli.monitor_iterations);
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.cli.monitor_interval_ms));
            run_monitor(&mut controller, iterations, interval)?;
        }

        Commands::Config { .. } => unreachable!("handled before opening the controller"),
    }

    Ok(())
}

/// Load the config file, falling back to defaults when it is missing or invalid
fn load_config(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::new();
    }
    AppConfig::load_from_file(path).unwrap_or_else(|e| {
        warn!("⚠️ {:#}, using defaults", e);
        AppConfig::new()
    })
}

fn open_controller(config: &AppConfig, simulate: bool) -> Result<Controller> {
    if simulate {
        println!("🧪 Using simulated arm");
        let connector = SimConnector::new(SimulatedArm::new());
        return Controller::open_with("USB", config.controller.clone(), &connector)
            .context("Failed to open simulated arm");
    }

    Controller::open(&config.cli.device, config.controller.clone())
        .with_context(|| format!("Failed to open controller on '{}'", config.cli.device))
}

fn print_positions(controller: &mut Controller, ids: &[u8], degrees: bool, json: bool) -> Result<()> {
    let mut servos: Vec<Servo> = ids.iter().map(|&id| Servo::new(id, 0)).collect();
    controller
        .get_positions(&mut servos)
        .context("Failed to read servo positions")?;

    if json {
        let rows: Vec<serde_json::Value> = servos
            .iter()
            .map(|s| {
                if degrees {
                    serde_json::json!({ "id": s.id, "angle": s.angle() })
                } else {
                    serde_json::json!({ "id": s.id, "position": s.position })
                }
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    for servo in &servos {
        if degrees {
            println!("Servo {}: {:7.2}°", servo.id, servo.angle());
        } else {
            println!("Servo {}: {:5}", servo.id, servo.position);
        }
    }
    Ok(())
}

/// Read all six positions every `interval` until done or Ctrl+C
fn run_monitor(controller: &mut Controller, iterations: u32, interval: Duration) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, stopping monitor...");
        running_handler.store(false, Ordering::SeqCst);
    })?;

    let mut servos = ALL_SERVOS.map(|id| Servo::new(id, 0));

    for i in 0..iterations {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let start = Instant::now();

        controller
            .get_positions(&mut servos)
            .with_context(|| format!("Position read failed on iteration {}", i + 1))?;

        let positions: Vec<String> = servos.iter().map(|s| format!("{:5}", s.position)).collect();
        println!("Iteration {:3} - Positions: {}", i + 1, positions.join(" "));

        if let Some(remaining) = interval.checked_sub(start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    println!("✅ Monitor finished");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   xarmctl --config {} battery", output_path.display());

    Ok(())
}
