use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pi_rover::beep::{BeepPattern, ReversingBeeper};
use pi_rover::camera::{Camera, CameraConfig};
use pi_rover::config::{AUDIO_DEVICE, CAMERA_PROGRAM, I2C_BUS, PWM_ADDRESS, WEB_PORT};
use pi_rover::demo::{self, DEMO_STEPS};
use pi_rover::motor::{DeviceError, PwmDevice, RecordingDevice, Rover};
use pi_rover::vision::VisionClient;
use pi_rover::web::{self, AppState};
use pi_rover::{shutdown, teleop};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "rover", about = "Drive the two-motor rover")]
struct Cli {
    /// I2C bus device of the motor HAT
    #[arg(long, global = true, default_value = I2C_BUS)]
    bus: String,

    /// PCA9685 I2C address (hex with 0x prefix, or decimal)
    #[arg(long, global = true, default_value_t = PWM_ADDRESS, value_parser = parse_address)]
    address: u8,

    /// Record motor writes instead of touching hardware
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Forward, backward, left, right, stop
    Demo,
    /// Drive with WASD/arrow keys
    Keyboard,
    /// Browser control panel
    Web(WebArgs),
}

#[derive(Debug, Args)]
struct WebArgs {
    #[arg(long, default_value_t = WEB_PORT)]
    port: u16,

    /// Do not start the camera stream
    #[arg(long)]
    no_camera: bool,

    /// Camera encoder producing MJPEG on stdout
    #[arg(long, default_value = CAMERA_PROGRAM)]
    camera_program: String,

    /// Disable the reversing beep
    #[arg(long)]
    no_audio: bool,

    /// ALSA device for the reversing beep
    #[arg(long, default_value = AUDIO_DEVICE)]
    audio_device: String,

    /// Enables the "what do you see" button
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address {:?}: {}", s, e))
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see every motor write)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // GEMINI_API_KEY may come from a .env file in the working directory
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Rover error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    if cli.dry_run {
        info!("Dry run: motor writes are recorded, not sent");
        let rover = Rover::new(RecordingDevice::new())?;
        return run_mode(cli.mode, rover).await;
    }

    info!("Initializing rover...");
    let board = open_board(&cli.bus, cli.address)?;
    let rover = Rover::new(board)?;
    run_mode(cli.mode, rover).await
}

#[cfg(target_os = "linux")]
fn open_board(
    bus: &str,
    address: u8,
) -> Result<pi_rover::motor::Pca9685Device<linux_embedded_hal::I2cdev>, DeviceError> {
    pi_rover::motor::Pca9685Device::open_linux(bus, address)
}

#[cfg(not(target_os = "linux"))]
fn open_board(bus: &str, _address: u8) -> Result<RecordingDevice, DeviceError> {
    Err(DeviceError::Open {
        path: bus.to_string(),
        reason: "I2C is only supported on Linux, use --dry-run".to_string(),
    })
}

async fn run_mode<D>(mode: Mode, rover: Rover<D>) -> Result<(), BoxError>
where
    D: PwmDevice + Send + 'static,
{
    match mode {
        Mode::Demo => run_demo(rover).await,
        Mode::Keyboard => run_keyboard(rover).await,
        Mode::Web(args) => run_web(rover, args).await,
    }
}

async fn run_demo<D: PwmDevice>(mut rover: Rover<D>) -> Result<(), BoxError> {
    let outcome = tokio::select! {
        result = demo::run(&mut rover, &DEMO_STEPS) => result.map_err(BoxError::from),
        _ = shutdown::signal() => Ok(()),
    };
    // Covers the interrupted case
    rover.stop()?;
    outcome
}

async fn run_keyboard<D>(mut rover: Rover<D>) -> Result<(), BoxError>
where
    D: PwmDevice + Send + 'static,
{
    let quit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&quit);
    let watcher = tokio::spawn(async move {
        shutdown::signal().await;
        flag.store(true, Ordering::Relaxed);
    });

    let result = tokio::task::spawn_blocking(move || teleop::run(&mut rover, &quit)).await;
    watcher.abort();
    result?
}

async fn run_web<D>(rover: Rover<D>, args: WebArgs) -> Result<(), BoxError>
where
    D: PwmDevice + Send + 'static,
{
    let mut state = AppState::new(rover);

    let camera = if args.no_camera {
        None
    } else {
        info!("Initializing camera...");
        let config = CameraConfig {
            program: args.camera_program.clone(),
            ..CameraConfig::default()
        };
        match Camera::start(&config) {
            Ok(camera) => Some(camera),
            Err(e) => {
                warn!("Camera initialization failed ({}), streaming disabled", e);
                None
            }
        }
    };
    if let Some(camera) = &camera {
        state = state.with_camera(camera.feed());
    }

    if !args.no_audio {
        info!("Initializing audio...");
        match ReversingBeeper::new(&args.audio_device, BeepPattern::default()) {
            Ok(beeper) => state = state.with_beeper(Arc::new(beeper)),
            Err(e) => warn!("Audio initialization failed ({}), reversing sound disabled", e),
        }
    }

    match args.gemini_api_key {
        Some(key) if !key.trim().is_empty() => state = state.with_vision(VisionClient::new(key)),
        _ => warn!("GEMINI_API_KEY not set, vision disabled"),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    web::serve(Arc::new(state), addr, async move {
        shutdown::signal().await;
        if let Some(camera) = camera {
            camera.stop().await;
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x40"), Ok(0x40));
        assert_eq!(parse_address("0X7f"), Ok(0x7F));
        assert_eq!(parse_address("64"), Ok(64));
        assert!(parse_address("0x1FF").is_err());
        assert!(parse_address("hat").is_err());
    }

    #[test]
    fn test_env_file_supplies_gemini_key() {
        let path = std::env::temp_dir().join(format!("rover-{}.env", std::process::id()));
        std::fs::write(&path, "# rover secrets\nGEMINI_API_KEY=\"abc123\"\n").unwrap();
        let vars: Vec<(String, String)> = dotenvy::from_path_iter(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(vars, vec![("GEMINI_API_KEY".to_string(), "abc123".to_string())]);
    }

    #[test]
    fn test_cli_parses_web_flags() {
        let cli = Cli::try_parse_from([
            "rover", "--dry-run", "web", "--port", "9000", "--no-camera",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.address, PWM_ADDRESS);
        match cli.mode {
            Mode::Web(args) => {
                assert_eq!(args.port, 9000);
                assert!(args.no_camera);
                assert_eq!(args.audio_device, "hw:2,0");
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }
}
