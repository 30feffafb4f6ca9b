//! `fc2-live-dl` — command-line FC2 livestream recorder (spec.md §6).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fc2_engine::{Latency, Quality, SessionConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Recognized `--log-level` values, matching the original's six-level
/// scheme (`silent` maps to disabling the filter entirely).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Silent,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "fc2-live-dl",
    version,
    about = "Download FC2 live streams as they air",
    disable_version_flag = true
)]
struct Cli {
    /// Channel URL or id, e.g. https://live.fc2.com/12345678/
    url: String,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Stream quality.
    #[arg(long, value_enum, default_value = "3mbps")]
    quality: CliQuality,

    /// Stream latency mode.
    #[arg(long, value_enum, default_value = "mid")]
    latency: CliLatency,

    /// Number of concurrent fragment fetchers.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Output filename template with %(key)s tokens (channel_id, channel_name,
    /// date, time, title, ext).
    #[arg(short, long, default_value = "%(date)s %(title)s (%(channel_name)s).%(ext)s")]
    output: String,

    /// Save chat/comments to a `.fc2chat.json` file.
    #[arg(long)]
    write_chat: bool,

    /// Save the channel metadata to a `.info.json` file.
    #[arg(long)]
    write_info_json: bool,

    /// Save the channel thumbnail to a `.png` file.
    #[arg(long)]
    write_thumbnail: bool,

    /// Dump every websocket frame (sent and received) to a `.ws.jsonl` file.
    #[arg(long)]
    dump_websocket: bool,

    /// Wait for the channel to go live instead of failing immediately.
    #[arg(long)]
    wait: bool,

    /// Seconds between online-status polls when `--wait` is set.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Netscape-format cookies file (for subscriber-only streams).
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Skip remuxing the captured stream into an mp4/m4a container.
    #[arg(long)]
    no_remux: bool,

    /// Keep the intermediate .ts file after remuxing.
    #[arg(short = 'k', long)]
    keep_intermediates: bool,

    /// Additionally extract an audio-only copy of the stream.
    #[arg(short = 'x', long)]
    extract_audio: bool,

    /// Logging verbosity.
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliQuality {
    #[value(name = "150kbps")]
    Kbps150,
    #[value(name = "400kbps")]
    Kbps400,
    #[value(name = "1.2mbps")]
    Mbps1_2,
    #[value(name = "2mbps")]
    Mbps2,
    #[value(name = "3mbps")]
    Mbps3,
    Sound,
}

impl From<CliQuality> for Quality {
    fn from(q: CliQuality) -> Self {
        match q {
            CliQuality::Kbps150 => Quality::Kbps150,
            CliQuality::Kbps400 => Quality::Kbps400,
            CliQuality::Mbps1_2 => Quality::Mbps1_2,
            CliQuality::Mbps2 => Quality::Mbps2,
            CliQuality::Mbps3 => Quality::Mbps3,
            CliQuality::Sound => Quality::Sound,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliLatency {
    Low,
    High,
    Mid,
}

impl From<CliLatency> for Latency {
    fn from(l: CliLatency) -> Self {
        match l {
            CliLatency::Low => Latency::Low,
            CliLatency::High => Latency::High,
            CliLatency::Mid => Latency::Mid,
        }
    }
}

/// Extract the channel id from a full `live.fc2.com` URL, or pass a bare id
/// through unchanged (original: `main`'s URL parsing). Returns `None` if the
/// input looks like a URL but isn't a recognizable `live.fc2.com` one.
fn parse_channel_id(input: &str) -> Option<String> {
    if !input.contains("://") {
        return Some(input.to_string());
    }
    let normalized = input.replacen("http://", "https://", 1);
    let rest = normalized.split("https://live.fc2.com").nth(1)?;
    let id = rest.trim_start_matches('/').split('/').next()?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        tracing::debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
    }

    let channel_id = match parse_channel_id(&cli.url) {
        Some(id) => id,
        None => {
            error!(url = %cli.url, "could not extract a channel id from this url");
            return ExitCode::FAILURE;
        }
    };

    let cookies = match &cli.cookies {
        Some(path) => match fc2_engine::cookies::CookieJar::load_file(path) {
            Ok(jar) => jar,
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load cookies file");
                return ExitCode::FAILURE;
            }
        },
        None => fc2_engine::cookies::CookieJar::new(),
    };

    let config = SessionConfig {
        quality: cli.quality.into(),
        latency: cli.latency.into(),
        threads: cli.threads.max(1),
        outtmpl: cli.output,
        write_chat: cli.write_chat,
        write_info_json: cli.write_info_json,
        write_thumbnail: cli.write_thumbnail,
        dump_websocket: cli.dump_websocket,
        wait_for_live: cli.wait,
        wait_poll_interval: Duration::from_secs(cli.poll_interval.max(1)),
        cookies_file: cli.cookies,
        remux: !cli.no_remux,
        keep_intermediates: cli.keep_intermediates,
        extract_audio: cli.extract_audio,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(channel_id, config, cookies))
}

async fn run(
    channel_id: String,
    config: SessionConfig,
    cookies: fc2_engine::cookies::CookieJar,
) -> ExitCode {
    let client = match reqwest::Client::builder().build() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build http client");
            return ExitCode::FAILURE;
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let result = fc2_engine::download(client, channel_id, config, Arc::new(cookies), cancel).await;

    // §5: "a short (~250 ms) grace period after orchestrator exit allows
    // network client teardown" — the websocket and http connections close
    // in the background, not synchronously with `download` returning.
    tokio::time::sleep(Duration::from_millis(250)).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "recording session ended with an error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_id_from_full_url() {
        assert_eq!(
            parse_channel_id("https://live.fc2.com/12345678/"),
            Some("12345678".to_string())
        );
        assert_eq!(
            parse_channel_id("http://live.fc2.com/12345678"),
            Some("12345678".to_string())
        );
    }

    #[test]
    fn parse_channel_id_passes_bare_id_through() {
        assert_eq!(parse_channel_id("12345678"), Some("12345678".to_string()));
    }

    #[test]
    fn parse_channel_id_rejects_unrecognized_url() {
        assert_eq!(parse_channel_id("https://example.com/12345678"), None);
    }
}
