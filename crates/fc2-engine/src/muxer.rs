//! Muxer Invoker (C5, spec.md §4.5).
//!
//! Wraps an external `ffmpeg` process that remuxes the captured transport
//! stream into the final container. Grounded on the original's `FFMpeg`
//! class for flag order and stderr progress-line parsing (space-split
//! `key=value` tokens, not a regex). Graceful termination writes ffmpeg's
//! own interactive quit key (`q`) to its stdin rather than signalling the
//! process, following `FfmpegEngine::start`'s cancellation handling in the
//! teacher's downloader engine — this keeps the shutdown path portable
//! without reaching for a signal-sending crate the workspace doesn't
//! otherwise depend on. Process spawning follows `process-utils`'s
//! `tokio_command` so the child gets `CREATE_NO_WINDOW` on Windows like
//! every other external process this workspace launches.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MuxerError;
use process_utils::tokio_command;

/// A single parsed `ffmpeg` progress line (original: `get_status`'s return
/// dict, defaults matching it field-for-field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerStatus {
    pub frame: String,
    pub fps: String,
    pub q: String,
    pub size: String,
    pub time: String,
    pub bitrate: String,
    pub speed: String,
}

impl Default for MuxerStatus {
    fn default() -> Self {
        Self {
            frame: "0".to_string(),
            fps: "0".to_string(),
            q: "0".to_string(),
            size: "0kB".to_string(),
            time: "00:00:00.00".to_string(),
            bitrate: "N/A".to_string(),
            speed: "N/A".to_string(),
        }
    }
}

/// Parse one `ffmpeg` stderr progress chunk. Tokens are whitespace
/// separated; a field is either `key=value` or `key=` followed by its value
/// in the next token (ffmpeg emits both forms depending on padding).
/// Unrecognized keys are ignored; missing keys keep their default.
pub fn parse_status_line(line: &str) -> MuxerStatus {
    let tokens: Vec<&str> = line.split_whitespace().filter(|t| !t.is_empty()).collect();
    let mut fields: HashMap<&str, String> = HashMap::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some((key, value)) = token.split_once('=') {
            if value.is_empty() {
                if i + 1 < tokens.len() {
                    fields.insert(key, tokens[i + 1].to_string());
                    i += 2;
                    continue;
                }
            } else {
                fields.insert(key, value.to_string());
            }
        }
        i += 1;
    }

    let mut status = MuxerStatus::default();
    if let Some(v) = fields.remove("frame") {
        status.frame = v;
    }
    if let Some(v) = fields.remove("fps") {
        status.fps = v;
    }
    if let Some(v) = fields.remove("q") {
        status.q = v;
    }
    if let Some(v) = fields.remove("size") {
        status.size = v;
    }
    if let Some(v) = fields.remove("time") {
        status.time = v;
    }
    if let Some(v) = fields.remove("bitrate") {
        status.bitrate = v;
    }
    if let Some(v) = fields.remove("speed") {
        status.speed = v;
    }
    status
}

/// A running `ffmpeg` remux/extract invocation.
pub struct Muxer {
    child: Child,
}

impl Muxer {
    /// Spawn `ffmpeg` to copy-remux `input` into `output`, with any extra
    /// flags (e.g. `-vn` for audio extraction) inserted before `-c copy`
    /// (original: `mux_flags`, exact order preserved).
    pub fn spawn(
        binary: &str,
        input: &Path,
        output: &Path,
        extra_flags: &[String],
    ) -> Result<Self, MuxerError> {
        let mut cmd = tokio_command(binary);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("fatal")
            .arg("-stats")
            .arg("-i")
            .arg(input)
            .args(extra_flags)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("faststart")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(MuxerError::Spawn)?;
        Ok(Self { child })
    }

    /// Run to completion, reporting each progress chunk to `on_status` as it
    /// is parsed. If `cancel` fires first, send an interrupt (original:
    /// `CTRL_C_EVENT` on Windows, `SIGINT` elsewhere) and wait for the child
    /// to exit on its own rather than killing it, so the container gets
    /// finalized.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut on_status: impl FnMut(MuxerStatus),
    ) -> Result<(), MuxerError> {
        let stderr = self.child.stderr.take().expect("stderr was piped");
        let mut reader = BufReader::new(stderr);
        let mut chunk = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    request_stop(&mut self.child).await;
                    break;
                }
                read = read_until_cr(&mut reader, &mut chunk) => {
                    match read {
                        Ok(true) => {
                            let line = String::from_utf8_lossy(&chunk);
                            on_status(parse_status_line(&line));
                            chunk.clear();
                        }
                        Ok(false) => break,
                        Err(e) => return Err(MuxerError::Io(e)),
                    }
                }
            }
        }

        let status = self.child.wait().await.map_err(MuxerError::Io)?;
        match status.code() {
            Some(0) | None => Ok(()),
            Some(code) => Err(MuxerError::NonZeroExit(code)),
        }
    }
}

/// Read from `reader` up to (and excluding) the next `\r`, appending into
/// `buf`. Returns `Ok(false)` at EOF with nothing read.
async fn read_until_cr(
    reader: &mut BufReader<tokio::process::ChildStderr>,
    buf: &mut Vec<u8>,
) -> std::io::Result<bool> {
    let n = reader.read_until(b'\r', buf).await?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(true)
}

async fn request_stop(child: &mut Child) {
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(b"q").await {
            warn!(error = %e, "failed to write graceful-stop key to muxer stdin");
        }
    }
    debug!("requested graceful muxer stop, waiting for exit");
    // No force-kill: ffmpeg needs to finish writing the container trailer
    // (faststart) after an interrupt, and the original never kills it either.
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_value_tokens() {
        let line = "frame=  120 fps= 30 q=-1.0 size=    512kB time=00:00:04.00 bitrate= 838.8kbits/s speed=1.0x";
        let status = parse_status_line(line);
        assert_eq!(status.frame, "120");
        assert_eq!(status.fps, "30");
        assert_eq!(status.size, "512kB");
        assert_eq!(status.time, "00:00:04.00");
        assert_eq!(status.speed, "1.0x");
    }

    #[test]
    fn missing_fields_keep_defaults() {
        let status = parse_status_line("frame=10");
        assert_eq!(status.frame, "10");
        assert_eq!(status.fps, "0");
        assert_eq!(status.bitrate, "N/A");
    }

    #[test]
    fn empty_line_is_all_defaults() {
        assert_eq!(parse_status_line(""), MuxerStatus::default());
    }

    #[test]
    fn key_equals_with_value_on_next_token() {
        // ffmpeg occasionally splits as "bitrate= N/A" when the field is unknown.
        let status = parse_status_line("bitrate= N/A speed= N/A");
        assert_eq!(status.bitrate, "N/A");
        assert_eq!(status.speed, "N/A");
    }
}
