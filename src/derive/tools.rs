//! External tool discovery and invocation.
//!
//! Tools are probed once at startup; the derivers pick their strategy from
//! the result instead of checking for binaries on every request.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};

/// Binaries found on this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    /// ffmpeg binary, if it answered `-version`.
    pub ffmpeg: Option<String>,
    /// audiowaveform binary, if it answered `--version`.
    pub audiowaveform: Option<String>,
}

impl Toolchain {
    /// Probes the binaries named in the configuration.
    pub async fn probe(config: &DaemonConfig) -> Self {
        let ffmpeg = probe_binary(&config.ffmpeg_bin, "-version").await;
        let audiowaveform = probe_binary(&config.audiowaveform_bin, "--version").await;

        tracing::info!(ffmpeg, audiowaveform, "external tools probed");

        Self {
            ffmpeg: ffmpeg.then(|| config.ffmpeg_bin.clone()),
            audiowaveform: audiowaveform.then(|| config.audiowaveform_bin.clone()),
        }
    }

    /// A toolchain with nothing installed.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Returns true if `bin version_flag` runs and exits successfully.
async fn probe_binary(bin: &str, version_flag: &str) -> bool {
    Command::new(bin)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Captured output of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Runs a tool to completion, mapping spawn failures and non-zero exits to
/// TOOL_UNAVAILABLE with the tail of stderr in the message.
pub async fn run_tool<I, S>(bin: &str, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DaemonError::tool_unavailable(bin, e.to_string()))?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(DaemonError::tool_unavailable(
            bin,
            format!("exited with {}: {}", output.status, tail(&stderr, 400)),
        ));
    }

    Ok(ToolOutput {
        stdout: output.stdout,
        stderr,
    })
}

/// Last `max` bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    let text = text.trim_end();
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn missing_binary_probes_as_absent() {
        let config = DaemonConfig {
            ffmpeg_bin: "definitely-not-a-real-ffmpeg-binary".to_string(),
            audiowaveform_bin: "definitely-not-a-real-audiowaveform".to_string(),
            ..DaemonConfig::default()
        };
        let tools = Toolchain::probe(&config).await;
        assert_eq!(tools, Toolchain::none());
    }

    #[tokio::test]
    async fn missing_binary_is_tool_unavailable() {
        let err = run_tool("definitely-not-a-real-binary", ["-version"])
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolUnavailable);
    }

    #[test]
    fn tail_keeps_end_of_output() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("0123456789", 4), "6789");
        assert_eq!(tail("ééééé", 3), "é");
    }
}
