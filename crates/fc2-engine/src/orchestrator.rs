//! Session Orchestrator (C6, spec.md §4.6).
//!
//! Drives one capture end to end: metadata, optional wait-for-live, output
//! path preparation, the websocket handshake, the concurrent
//! stream/chat/disconnection-watch tasks, and post-processing. Grounded on
//! the original's `FC2LiveDL.download`: the three inner tasks race via
//! first-completion, the loser(s) are cancelled, and only a genuinely
//! unexpected error is propagated — a user interrupt or a server
//! disconnection both end the session quietly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ChannelMeta, LiveStreamApi};
use crate::config::{target_mode, SessionConfig};
use crate::cookies::CookieJar;
use crate::error::{SessionError, WsError};
use crate::hls::HlsDownloader;
use crate::muxer::Muxer;
use crate::paths::prepare_unique_path;
use crate::template::format_outtmpl;
use crate::ws::FC2WebSocket;

/// Every output path the session might produce, resolved up front so a
/// collision with a previous run's files is caught before any network
/// activity starts (§4.6 step 2).
struct OutputPaths {
    info_json: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
    stream: PathBuf,
    chat: Option<PathBuf>,
    muxed: PathBuf,
    audio: Option<PathBuf>,
    ws_dump: Option<PathBuf>,
}

fn build_filenames(
    config: &SessionConfig,
    meta: &ChannelMeta,
) -> Result<OutputPaths, std::io::Error> {
    let now = Local::now();
    let mut fields = BTreeMap::new();
    fields.insert("channel_id", meta.channel_id.clone());
    fields.insert("channel_name", meta.channel_name.clone());
    fields.insert("title", meta.title.clone());
    fields.insert("date", now.format("%Y-%m-%d").to_string());
    fields.insert("time", now.format("%H%M%S").to_string());

    let with_ext = |ext: &str| -> Result<PathBuf, std::io::Error> {
        prepare_unique_path(
            |extn| {
                let mut f = fields.clone();
                f.insert("ext", extn.to_string());
                PathBuf::from(format_outtmpl(&config.outtmpl, &f))
            },
            ext,
        )
    };

    let audio_only = config.quality.is_audio_only();

    Ok(OutputPaths {
        info_json: config.write_info_json.then(|| with_ext("info.json")).transpose()?,
        thumbnail: config.write_thumbnail.then(|| with_ext("png")).transpose()?,
        stream: with_ext("ts")?,
        chat: config.write_chat.then(|| with_ext("fc2chat.json")).transpose()?,
        muxed: with_ext(if audio_only { "m4a" } else { "mp4" })?,
        audio: (config.extract_audio && !audio_only)
            .then(|| with_ext("m4a"))
            .transpose()?,
        ws_dump: config.dump_websocket.then(|| with_ext("ws.jsonl")).transpose()?,
    })
}

/// Run one full capture session for `channel_id` under `config`.
pub async fn download(
    client: Client,
    channel_id: String,
    config: SessionConfig,
    cookies: Arc<CookieJar>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let api = LiveStreamApi::new(client.clone(), channel_id.clone(), Arc::clone(&cookies));

    let meta = api.get_meta(false).await?;
    if !meta.is_publish {
        if config.wait_for_live {
            info!(channel_id, "channel is offline, waiting for it to go live");
            api.wait_for_online(config.wait_poll_interval).await;
        } else {
            return Err(crate::error::ApiError::NotOnline.into());
        }
    }
    let meta = api.get_meta(true).await?;

    let paths = build_filenames(&config, &meta)?;

    if let Some(info_path) = &paths.info_json {
        let body = serde_json::to_vec_pretty(&meta.raw).map_err(crate::error::ApiError::Json)?;
        tokio::fs::write(info_path, body).await?;
    }
    if let Some(thumb_path) = &paths.thumbnail {
        download_thumbnail(&client, &meta.thumbnail_url, thumb_path).await?;
    }

    let ws_url = api.get_websocket_url().await?;
    let (ws, comments_rx) = FC2WebSocket::connect(&ws_url, paths.ws_dump.clone()).await?;
    let ws = Arc::new(ws);

    let hls_info = ws.get_hls_information().await?;
    let mode = target_mode(config.quality, config.latency);
    let playlist_url =
        crate::hls::pick_url(&hls_info, mode).ok_or(WsError::EmptyPlaylist)?;

    let downloader = HlsDownloader::new(client.clone(), playlist_url, config.threads);
    let downloader_cancel = CancellationToken::new();
    let (poller, workers) = downloader.spawn(downloader_cancel.clone());

    // T3 (§4.6 step 6): only spawned if write_chat is set, but still raced
    // against T1/T2 below like the original's `coros` list — a chat-writer
    // failure ends the session exactly like a stream or disconnection
    // failure would.
    let chat_task = paths
        .chat
        .clone()
        .map(|path| tokio::spawn(write_chat(comments_rx, path)));

    let stream_task = {
        let downloader = Arc::clone(&downloader);
        let path = paths.stream.clone();
        tokio::spawn(write_stream(downloader, path))
    };
    let disconnection_task = {
        let ws = Arc::clone(&ws);
        tokio::spawn(async move { ws.wait_disconnection().await })
    };

    // Capture abort handles before the tasks are consumed by `select!` below
    // — whichever of T1/T2/T3 does NOT win the race is otherwise left
    // running in the background instead of being cancelled as a sibling
    // (§4.6 step 7, §5 "group cancellation").
    let stream_abort = stream_task.abort_handle();
    let disconnection_abort = disconnection_task.abort_handle();
    let chat_abort = chat_task.as_ref().map(tokio::task::JoinHandle::abort_handle);

    let outcome = match chat_task {
        Some(chat_task) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Interrupted,
                reason = disconnection_task => Outcome::Disconnected(reason.unwrap_or(WsError::Closed)),
                result = stream_task => Outcome::StreamEnded(result.unwrap_or(Ok(()))),
                result = chat_task => Outcome::ChatEnded(result.unwrap_or(Ok(()))),
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Interrupted,
                reason = disconnection_task => Outcome::Disconnected(reason.unwrap_or(WsError::Closed)),
                result = stream_task => Outcome::StreamEnded(result.unwrap_or(Ok(()))),
            }
        }
    };

    downloader_cancel.cancel();
    poller.abort();
    for worker in workers {
        worker.abort();
    }
    stream_abort.abort();
    disconnection_abort.abort();
    if let Some(chat_abort) = chat_abort {
        chat_abort.abort();
    }
    ws.close().await;

    match outcome {
        Outcome::Interrupted => {
            info!("interrupted by user");
        }
        Outcome::Disconnected(reason) => {
            warn!(reason = %reason, "server disconnected the control channel");
        }
        Outcome::StreamEnded(Ok(())) => {
            info!("stream finished");
        }
        Outcome::StreamEnded(Err(e)) => return Err(e),
        Outcome::ChatEnded(Ok(())) => {
            info!("chat writer finished");
        }
        Outcome::ChatEnded(Err(e)) => return Err(e),
    }

    post_process(&config, &paths).await?;
    Ok(())
}

enum Outcome {
    Interrupted,
    Disconnected(WsError),
    StreamEnded(Result<(), SessionError>),
    ChatEnded(Result<(), SessionError>),
}

async fn write_stream(downloader: Arc<HlsDownloader>, path: PathBuf) -> Result<(), SessionError> {
    let mut file = tokio::fs::File::create(&path).await?;
    let mut fragments = 0u64;
    let mut bytes = 0u64;
    loop {
        match downloader.read_ordered().await? {
            Some(data) => {
                if !data.is_empty() {
                    file.write_all(&data).await?;
                    bytes += data.len() as u64;
                }
                fragments += 1;
                info!(fragments, size = %human_bytes(bytes), "downloaded fragment");
            }
            None => return Ok(()),
        }
    }
}

/// Binary-unit byte formatting, matching the original's `sizeof_fmt` (progress
/// line, e.g. `"12.3MiB"`).
fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KiB", "MiB", "GiB", "TiB", "PiB"] {
        if value.abs() < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}EiB")
}

async fn write_chat(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Value>,
    path: PathBuf,
) -> Result<(), SessionError> {
    let mut file = tokio::fs::File::create(&path).await?;
    while let Some(comment) = rx.recv().await {
        if let Ok(mut line) = serde_json::to_string(&comment) {
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
    }
    Ok(())
}

async fn download_thumbnail(
    client: &Client,
    url: &str,
    path: &std::path::Path,
) -> Result<(), SessionError> {
    if url.is_empty() {
        return Ok(());
    }
    let resp = client.get(url).send().await.map_err(crate::error::ApiError::Http)?;
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(crate::error::ApiError::Http)?;
        file.write_all(&chunk).await?;
    }
    Ok(())
}

/// Remux the captured transport stream, optionally extract audio, and clean
/// up the intermediate file (§4.6 step 7).
async fn post_process(config: &SessionConfig, paths: &OutputPaths) -> Result<(), SessionError> {
    if !paths.stream.exists() {
        return Ok(());
    }
    if !config.remux {
        return Ok(());
    }

    Muxer::spawn("ffmpeg", &paths.stream, &paths.muxed, &[])?
        .run(CancellationToken::new(), |_status| {})
        .await?;

    if let Some(audio_path) = &paths.audio {
        Muxer::spawn(
            "ffmpeg",
            &paths.stream,
            audio_path,
            &["-vn".to_string()],
        )?
        .run(CancellationToken::new(), |_status| {})
        .await?;
    }

    if !config.keep_intermediates && paths.muxed.exists() {
        let _ = tokio::fs::remove_file(&paths.stream).await;
    }

    Ok(())
}
