//! Live Stream API Client (C4, spec.md §4.1).
//!
//! HTTP endpoints for channel metadata and the control-server handshake.
//! Grounded on `platforms::extractor::platform_extractor::Extractor`'s
//! cookie-header-per-request pattern: cookies live in our own jar and are
//! attached by hand, since the shared `reqwest::Client` is built without the
//! `cookies` feature.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::cookies::CookieJar;
use crate::error::ApiError;

const MEMBER_API_URL: &str = "https://live.fc2.com/api/memberApi.php";
const CONTROL_SERVER_URL: &str = "https://live.fc2.com/api/getControlServer.php";
const CLIENT_VERSION: &str = "2.1.0\n+[1]";

/// Immutable snapshot of a channel's metadata (spec.md §3 "Channel
/// metadata"). Refreshable on demand via [`LiveStreamApi::get_meta`].
#[derive(Debug, Clone)]
pub struct ChannelMeta {
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub thumbnail_url: String,
    pub is_publish: bool,
    pub version: String,
    /// The full `data` branch of the memberApi response, kept for
    /// `--write-info-json`.
    pub raw: Value,
}

#[derive(Deserialize)]
struct MemberApiResponse {
    data: Value,
}

#[derive(Deserialize)]
struct ControlServerResponse {
    url: String,
    control_token: String,
}

/// Client for `live.fc2.com`'s member/control-server HTTP API.
pub struct LiveStreamApi {
    client: Client,
    channel_id: String,
    cookies: Arc<CookieJar>,
    cached_meta: tokio::sync::Mutex<Option<ChannelMeta>>,
}

impl LiveStreamApi {
    pub fn new(client: Client, channel_id: impl Into<String>, cookies: Arc<CookieJar>) -> Self {
        Self {
            client,
            channel_id: channel_id.into(),
            cookies,
            cached_meta: tokio::sync::Mutex::new(None),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn apply_cookies(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cookies.header_value() {
            Some(header) => builder.header(reqwest::header::COOKIE, header),
            None => builder,
        }
    }

    /// POST to the member-API endpoint; caches the `data` branch unless
    /// `refresh` is set (§4.1).
    pub async fn get_meta(&self, refresh: bool) -> Result<ChannelMeta, ApiError> {
        {
            let cached = self.cached_meta.lock().await;
            if let (false, Some(meta)) = (refresh, cached.as_ref()) {
                return Ok(meta.clone());
            }
        }

        let form = [
            ("channel", "1"),
            ("profile", "1"),
            ("user", "1"),
            ("streamid", self.channel_id.as_str()),
        ];
        trace!(url = MEMBER_API_URL, ?form, "get_meta>");

        let req = self.apply_cookies(self.client.post(MEMBER_API_URL).form(&form));
        let resp = req.send().await?;
        // FC2 labels its JSON body `text/javascript`; read it as text and
        // parse manually rather than relying on reqwest's content-type check.
        let body = resp.text().await?;
        let parsed: MemberApiResponse = serde_json::from_str(&body)?;
        trace!("<get_meta {:?}", parsed.data);

        let channel_data = &parsed.data["channel_data"];
        let profile_data = &parsed.data["profile_data"];
        let meta = ChannelMeta {
            channel_id: channel_data["channelid"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            channel_name: profile_data["name"].as_str().unwrap_or_default().to_string(),
            title: channel_data["title"].as_str().unwrap_or_default().to_string(),
            thumbnail_url: channel_data["image"].as_str().unwrap_or_default().to_string(),
            is_publish: channel_data["is_publish"].as_i64().unwrap_or(0) > 0,
            version: channel_data["version"].as_str().unwrap_or_default().to_string(),
            raw: parsed.data,
        };

        *self.cached_meta.lock().await = Some(meta.clone());
        Ok(meta)
    }

    pub async fn is_online(&self, refresh: bool) -> Result<bool, ApiError> {
        Ok(self.get_meta(refresh).await?.is_publish)
    }

    /// Poll `is_online` in 1-second sub-ticks, aggregated to
    /// `interval_seconds` between refreshes (§4.1).
    pub async fn wait_for_online(&self, interval_seconds: Duration) {
        let ticks = interval_seconds.as_secs().max(1);
        loop {
            match self.is_online(true).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "error while polling online status"),
            }
            for _ in 0..ticks {
                debug!("waiting for stream to go live...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// Obtain the control-server URL, appending `?control_token=...`
    /// (§4.1). Requires metadata; fails with [`ApiError::NotOnline`] if the
    /// cached snapshot says the channel is offline.
    pub async fn get_websocket_url(&self) -> Result<String, ApiError> {
        let meta = self.get_meta(false).await?;
        if !self.is_online(false).await? {
            return Err(ApiError::NotOnline);
        }

        let orz = self.cookies.value("l_ortkn").unwrap_or_default();
        let form = [
            ("channel_id", self.channel_id.as_str()),
            ("mode", "play"),
            ("orz", orz),
            ("channel_version", meta.version.as_str()),
            ("client_version", CLIENT_VERSION),
            ("client_type", "pc"),
            ("client_app", "browser_hls"),
            ("ipv6", ""),
        ];
        trace!(url = CONTROL_SERVER_URL, ?form, "get_websocket_url>");

        let req = self.apply_cookies(self.client.post(CONTROL_SERVER_URL).form(&form));
        let resp = req.send().await?;
        let info: ControlServerResponse = resp.json().await?;
        trace!(url = %info.url, "<get_websocket_url");

        log_control_token(&info.control_token)?;

        Ok(format!(
            "{}?control_token={}",
            info.url, info.control_token
        ))
    }
}

/// Base64-decode the middle (payload) segment of the control token JWT and
/// log whether the `fc2_id` claim is non-empty (§3 "Control token").
fn log_control_token(control_token: &str) -> Result<(), ApiError> {
    let payload_segment = control_token
        .split('.')
        .nth(1)
        .ok_or_else(|| ApiError::MalformedControlToken(control_token.to_string()))?;
    let padded = format!("{payload_segment}==");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| ApiError::MalformedControlToken(e.to_string()))?;
    let value: Value = serde_json::from_slice(&decoded)?;
    let fc2_id = value["fc2_id"].as_str().unwrap_or_default();
    if !fc2_id.is_empty() {
        debug!(fc2_id, "logged in with ID");
    } else {
        debug!("using anonymous account");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_token_payload_decodes() {
        // {"fc2_id":"12345"} base64-encoded without padding, as FC2 emits it.
        let payload = base64::engine::general_purpose::STANDARD
            .encode(br#"{"fc2_id":"12345"}"#)
            .trim_end_matches('=')
            .to_string();
        let token = format!("header.{payload}.sig");
        log_control_token(&token).unwrap();
    }

    #[test]
    fn control_token_without_dot_is_malformed() {
        assert!(log_control_token("not-a-jwt").is_err());
    }
}
