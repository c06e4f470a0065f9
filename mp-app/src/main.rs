//! Mooltipass client entry point.
//!
//! ```text
//! mp-app                              Native-messaging host (same as `serve`)
//! mp-app export-flash dump.bin        Dump flash to a file
//! mp-app import-eeprom eeprom.bin     Write a file to EEPROM
//! mp-app upload-slot picture.bin      Store a file in a new media slot
//! mp-app erase-smartcard              Wipe the inserted card
//! mp-app --emulator 127.0.0.1:7777 …  Use a TCP device emulator
//! mp-app --config <path>              Load a custom config TOML
//! mp-app --gen-config                 Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mp_app::commands;
use mp_app::config::AppConfig;
use mp_core::{
    ExportKind, ImportTarget, Maintenance, SessionHandle, StreamTarget, StreamTransport, Transport,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mp-app", about = "Mooltipass client host and maintenance tool")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mp-app.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Talk to a device emulator at host:port instead of USB HID.
    #[arg(long, value_name = "ADDR")]
    emulator: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Extension origin; browsers pass it when launching a native host.
    #[arg(hide = true)]
    origin: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the browser native-messaging host on stdin/stdout.
    Serve,
    /// Dump the flash memory to a file.
    ExportFlash { file: PathBuf },
    /// Dump the EEPROM to a file.
    ExportEeprom { file: PathBuf },
    /// Write a file to flash.
    ImportFlash { file: PathBuf },
    /// Write a file to the EEPROM.
    ImportEeprom { file: PathBuf },
    /// Write a file to the media partition.
    ImportMedia { file: PathBuf },
    /// Store a file in a newly allocated media slot.
    UploadSlot { file: PathBuf },
    /// Erase the whole flash.
    EraseFlash,
    /// Erase the EEPROM.
    EraseEeprom,
    /// Erase the inserted smartcard.
    EraseSmartcard,
    /// Reset the inserted smartcard.
    ResetCard,
    /// Print firmware version and flash geometry.
    Version,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config);
    if let Some(addr) = cli.emulator {
        config.device.emulator = addr;
    }

    // stdout belongs to the browser in serve mode
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = cli.command.unwrap_or(Command::Serve);
    info!("mp-app v{}", env!("CARGO_PKG_VERSION"));
    if let Some(origin) = &cli.origin {
        info!("launched by {origin}");
    }

    if let Some(addr) = config.emulator() {
        info!("using emulator at {addr}");
        let transport = StreamTransport::new(StreamTarget::parse(addr)?);
        return run(transport, &config, command).await;
    }

    run_hid(&config, command).await
}

#[cfg(feature = "hid")]
async fn run_hid(config: &AppConfig, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let transport =
        mp_app::hid::HidTransport::new(config.device.vendor_id, config.device.product_id);
    run(transport, config, command).await
}

#[cfg(not(feature = "hid"))]
async fn run_hid(_config: &AppConfig, _command: Command) -> Result<(), Box<dyn std::error::Error>> {
    error!("built without HID support");
    Err("no device backend: rebuild with --features hid or pass --emulator host:port".into())
}

async fn run<T>(
    transport: T,
    config: &AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>>
where
    T: Transport + 'static,
{
    let (handle, task) = mp_core::spawn(transport, config.to_session_config());
    let result = execute(&handle, config, command).await;
    handle.shutdown().await?;
    task.await?;
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}

async fn execute(
    handle: &SessionHandle,
    config: &AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(command, Command::Serve) {
        commands::serve(handle).await?;
        return Ok(());
    }

    let status = handle.wait_ready(config.ready_timeout()).await?;
    info!("{}", commands::describe(&status));
    let started = Instant::now();

    match command {
        Command::Serve => {}
        Command::Version => println!("{}", commands::describe(&status)),
        Command::ExportFlash { file } => export(handle, ExportKind::Flash, file).await?,
        Command::ExportEeprom { file } => export(handle, ExportKind::Eeprom, file).await?,
        Command::ImportFlash { file } => import(handle, ImportTarget::Flash, file).await?,
        Command::ImportEeprom { file } => import(handle, ImportTarget::Eeprom, file).await?,
        Command::ImportMedia { file } => import(handle, ImportTarget::Media, file).await?,
        Command::UploadSlot { file } => {
            let report = commands::upload_slot(handle, &file).await?;
            println!(
                "{} bytes from {} stored in slot {} (blake3 {})",
                report.bytes,
                file.display(),
                report.slot,
                report.digest
            );
        }
        Command::EraseFlash => maintenance(handle, Maintenance::EraseFlash).await?,
        Command::EraseEeprom => maintenance(handle, Maintenance::EraseEeprom).await?,
        Command::EraseSmartcard => maintenance(handle, Maintenance::EraseSmartcard).await?,
        Command::ResetCard => maintenance(handle, Maintenance::ResetCard).await?,
    }

    info!("done in {}", commands::format_duration(started.elapsed()));
    Ok(())
}

async fn export(handle: &SessionHandle, kind: ExportKind, file: PathBuf) -> mp_core::Result<()> {
    let report = commands::export(handle, kind, &file).await?;
    println!(
        "{} bytes of {kind} written to {} (blake3 {})",
        report.size,
        file.display(),
        report.digest
    );
    Ok(())
}

async fn import(handle: &SessionHandle, target: ImportTarget, file: PathBuf) -> mp_core::Result<()> {
    let report = commands::import(handle, target, &file).await?;
    println!(
        "{} bytes from {} written to {target} (blake3 {})",
        report.bytes,
        file.display(),
        report.digest
    );
    Ok(())
}

async fn maintenance(handle: &SessionHandle, op: Maintenance) -> mp_core::Result<()> {
    commands::maintenance(handle, op).await?;
    println!("{op}: ok");
    Ok(())
}
