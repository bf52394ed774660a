mod audio;
mod cart;
mod config;
mod display;
mod gui;
mod i2c_bus;
mod input;
mod latch;
mod orchestrator;
mod peripheral_mux;
mod session;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;

use audio::AMP_ADDR;
use config::Config;
use display::MemoryPanel;
use i2c_bus::SimulatedBus;
use input::KeyboardInput;
use orchestrator::{Backends, Device};
use peripheral_mux::Peripheral;

const USAGE: &str = "usage: emubox [--config PATH] [ROM_DIR]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    rom_dir: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            s if s.starts_with('-') => return Err(format!("unknown option {s}\n{USAGE}")),
            _ if parsed.rom_dir.is_some() => {
                return Err(format!("unexpected argument {arg}\n{USAGE}"))
            }
            _ => parsed.rom_dir = Some(PathBuf::from(arg)),
        }
    }
    Ok(parsed)
}

/// Host stand-ins for the board: an I2C bus with the amplifier behind
/// the switch, an in-memory panel, and stdin buttons.
fn host_backends(config: &Config) -> Backends {
    let bus = SimulatedBus::new();
    bus.attach(AMP_ADDR, Peripheral::Audio);
    Backends {
        bus: Box::new(bus),
        panel: Box::new(MemoryPanel::new(config.display_width, config.display_height)),
        input: Box::new(KeyboardInput::new()),
    }
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    let config_path = args.config.or_else(Config::config_path);
    let mut config = config_path.as_deref().map(Config::load_from).unwrap_or_default();

    // RUST_LOG wins; otherwise the configured level.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    if let Some(dir) = args.rom_dir {
        config.mount_point = dir;
        config.rom_dir = PathBuf::new();
    }
    log::info!(
        "emubox {} (roms in {})",
        env!("CARGO_PKG_VERSION"),
        config.mount_point.join(&config.rom_dir).display()
    );

    let backends = host_backends(&config);
    let mut device = Device::new(config, backends);
    if let Some(path) = config_path {
        device = device.with_config_path(path);
    }
    device.boot();
    device.run_forever()
}
