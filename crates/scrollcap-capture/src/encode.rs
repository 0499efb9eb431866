//! Frame assembly: screencast JPEGs in, a webm out, via ffmpeg.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use scrollcap_core::{defaults, Error, Result};

/// Run a command with a timeout, discarding stdout.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<()> {
    let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Engine(format!("external command timed out after {}s", timeout_secs))
        })?
        .map_err(|e| Error::Engine(format!("failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Engine(format!(
            "command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

/// Verify ffmpeg is on the PATH. Called once at engine startup so a missing
/// encoder is fatal to the process, not discovered mid-job.
pub async fn check_ffmpeg() -> Result<()> {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => Ok(()),
        Ok(_) => Err(Error::Engine("ffmpeg -version exited non-zero".to_string())),
        Err(e) => Err(Error::Engine(format!("ffmpeg not available: {}", e))),
    }
}

/// Write collected frames and assemble them into `out_dir/capture.webm`.
///
/// Everything stays inside `out_dir` so the final rename is atomic on the
/// same filesystem: frames land in a scratch subdirectory, ffmpeg writes a
/// temp file, and only a complete encode is renamed into place.
pub async fn assemble_webm(
    out_dir: &Path,
    frames: &[Vec<u8>],
    frame_rate: u32,
    timeout_secs: u64,
) -> Result<PathBuf> {
    if frames.is_empty() {
        return Err(Error::Engine("no screencast frames collected".to_string()));
    }

    let scratch = out_dir.join(".frames");
    fs::create_dir_all(&scratch).await?;

    for (i, frame) in frames.iter().enumerate() {
        fs::write(scratch.join(format!("frame_{:05}.jpg", i)), frame).await?;
    }

    let temp_out = out_dir.join(".capture.webm.tmp");
    let final_out = out_dir.join(defaults::ARTIFACT_FILE_NAME);

    let pattern = scratch.join("frame_%05d.jpg");
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-framerate")
        .arg(frame_rate.to_string())
        .arg("-i")
        .arg(&pattern)
        .arg("-c:v")
        .arg("libvpx-vp9")
        .arg("-b:v")
        .arg("1M")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-f")
        .arg("webm")
        .arg(&temp_out);

    let encode = run_cmd_with_timeout(&mut cmd, timeout_secs).await;

    // scratch frames are no longer needed whatever happened
    let _ = fs::remove_dir_all(&scratch).await;

    encode?;

    fs::rename(&temp_out, &final_out).await?;
    debug!(
        frames = frames.len(),
        out = %final_out.display(),
        "webm assembled"
    );

    Ok(final_out)
}
