//! Subcommand bodies. Each one runs against a live [`SessionHandle`].

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use mp_core::{
    ExportKind, ExportReport, FileSink, ImportReport, ImportTarget, Maintenance, MpError, Result,
    SessionHandle, SessionStatus, SlotReport,
};

use crate::bridge;

/// Dump flash or EEPROM to `path`.
pub async fn export(handle: &SessionHandle, kind: ExportKind, path: &Path) -> Result<ExportReport> {
    let mut sink = FileSink::new(path);
    let report = handle.export(kind, &mut sink).await?;
    if report.received < report.size {
        info!(
            "device sent {} of {} bytes; the rest of {} is zero",
            report.received,
            report.size,
            path.display()
        );
    }
    Ok(report)
}

/// Write the contents of `path` to flash, EEPROM or the media partition.
pub async fn import(handle: &SessionHandle, target: ImportTarget, path: &Path) -> Result<ImportReport> {
    let data = read_input(path).await?;
    info!("importing {} bytes from {} to {target}", data.len(), path.display());
    handle.import(target, data).await
}

/// Store the contents of `path` in a new media slot.
pub async fn upload_slot(handle: &SessionHandle, path: &Path) -> Result<SlotReport> {
    let data = read_input(path).await?;
    handle.upload_slot(data).await
}

pub async fn maintenance(handle: &SessionHandle, op: Maintenance) -> Result<()> {
    info!("running {op}");
    handle.maintenance(op).await
}

/// Run the native-messaging host on stdin/stdout until the browser hangs
/// up or Ctrl-C arrives.
pub async fn serve(handle: &SessionHandle) -> Result<()> {
    let relay = bridge::run(handle.clone(), tokio::io::stdin(), tokio::io::stdout());
    tokio::select! {
        result = relay => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            Ok(())
        }
    }
}

async fn read_input(path: &Path) -> Result<Bytes> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| MpError::Other(format!("cannot read {}: {e}", path.display())))?;
    if data.is_empty() {
        return Err(MpError::Other(format!("{} is empty", path.display())));
    }
    Ok(Bytes::from(data))
}

/// One-line device summary for the `version` command.
pub fn describe(status: &SessionStatus) -> String {
    let version = status.version.as_deref().unwrap_or("unknown");
    let device = status.device.as_deref().unwrap_or("-");
    match status.geometry {
        Some(geo) => format!(
            "firmware {version} on {device}, flash {} x {} bytes",
            geo.page_count, geo.page_size
        ),
        None => format!("firmware {version} on {device}, flash chip unknown"),
    }
}

pub fn format_duration(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}
