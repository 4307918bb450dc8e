//! Export file naming and the `save_as` round trip

use calcflow_execution::JobEngine;
use calcflow_ipc::{ExportFormat, InputSpec, SaveAsPayload};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::error::OrchestrationError;
use crate::poll::JobPoller;

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Base name of a worksheet path, or `result` when there is none
pub fn worksheet_stem(path: Option<&str>) -> String {
    path.and_then(|p| Path::new(p).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(sanitize)
        .unwrap_or_else(|| "result".to_string())
}

/// Longest file name most filesystems accept, in bytes
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Hex digits of the digest kept when a name is shortened
const NAME_DIGEST_LEN: usize = 12;

/// Fit `{base}.{ext}` into [`MAX_FILE_NAME_BYTES`].
///
/// An oversized base is cut and suffixed with a digest of the full base, so
/// rows that differ only past the cut still get distinct names.
fn bounded_file_name(base: &str, format: ExportFormat) -> String {
    let extension = format.extension();
    let max_base = MAX_FILE_NAME_BYTES - extension.len() - 1;
    if base.len() <= max_base {
        return format!("{}.{}", base, extension);
    }

    let digest = format!("{:x}", Sha256::digest(base.as_bytes()));
    let mut keep = max_base - NAME_DIGEST_LEN - 1;
    while !base.is_char_boundary(keep) {
        keep -= 1;
    }
    format!(
        "{}_{}.{}",
        &base[..keep],
        &digest[..NAME_DIGEST_LEN],
        extension
    )
}

/// `{stem}_{alias}-{value}[_{alias}-{value}...].{ext}`, or `{stem}_row{index}.{ext}`.
///
/// Names longer than [`MAX_FILE_NAME_BYTES`] are shortened with a digest.
pub fn batch_file_name(
    stem: &str,
    inputs: &[InputSpec],
    row_index: usize,
    format: ExportFormat,
) -> String {
    let suffix = if inputs.is_empty() {
        format!("row{}", row_index)
    } else {
        inputs
            .iter()
            .map(|input| format!("{}-{}", sanitize(&input.alias), sanitize(&input.value.to_string())))
            .collect::<Vec<_>>()
            .join("_")
    };
    bounded_file_name(&format!("{}_{}", stem, suffix), format)
}

/// `{workflow}_Step{n}_{stem}.{ext}`
pub fn workflow_file_name(
    workflow_name: &str,
    step_number: usize,
    worksheet: &str,
    format: ExportFormat,
) -> String {
    let base = format!(
        "{}_Step{}_{}",
        sanitize(workflow_name),
        step_number,
        worksheet_stem(Some(worksheet))
    );
    bounded_file_name(&base, format)
}

/// Export the active worksheet to `target`, replacing any existing file.
///
/// The automation target prompts before overwriting, so the old file is
/// removed first.
pub async fn export_active_worksheet(
    poller: &JobPoller,
    engine: &dyn JobEngine,
    target: &Path,
    format: ExportFormat,
) -> Result<(), OrchestrationError> {
    match tokio::fs::remove_file(target).await {
        Ok(()) => debug!(path = %target.display(), "Removed previous export"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    poller
        .run(
            engine,
            SaveAsPayload {
                path: target.display().to_string(),
                format: Some(format),
            },
        )
        .await?;
    Ok(())
}
