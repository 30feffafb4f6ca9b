//! HLS information payload parsing and playlist selection (spec.md §3, §4.3
//! selector description, invariants I5/I6).

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// One playlist entry from the HLS information message.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    pub url: String,
    pub mode: i64,
}

impl PlaylistEntry {
    /// `true` for the packed "sound" mode family (`mode >= 90`).
    pub fn is_audio_only(&self) -> bool {
        self.mode >= 90
    }

    /// Sort key used by [`sort_playlists`]: non-audio modes rank strictly
    /// above all `mode >= 90` entries regardless of numeric value (I6).
    fn sort_key(&self) -> i64 {
        if self.mode >= 90 {
            self.mode - 90
        } else {
            self.mode
        }
    }
}

/// Merge `playlists`, `playlists_high_latency`, and `playlists_middle_latency`
/// from the raw HLS information payload into one list (§4.3 step 1).
pub fn merge_playlists(hls_info: &Value) -> Vec<PlaylistEntry> {
    let mut merged = Vec::new();
    for key in ["playlists", "playlists_high_latency", "playlists_middle_latency"] {
        if let Some(list) = hls_info.get(key).and_then(Value::as_array) {
            for entry in list {
                if let Ok(entry) = serde_json::from_value::<PlaylistEntry>(entry.clone()) {
                    merged.push(entry);
                }
            }
        }
    }
    merged
}

/// Sort playlists best-first: video modes outrank all `mode >= 90` (audio)
/// entries, and within each group higher `mode` outranks lower (I6).
pub fn sort_playlists(mut merged: Vec<PlaylistEntry>) -> Vec<PlaylistEntry> {
    merged.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    merged
}

/// Select the playlist matching `target_mode` exactly, falling back to the
/// top-ranked (best available) entry with a warning otherwise (§4.3, I5).
///
/// Panics if `sorted` is empty — the caller (HLS information fetch) already
/// treats an empty `playlists` key as [`crate::error::WsError::EmptyPlaylist`].
pub fn select_playlist(sorted: &[PlaylistEntry], target_mode: i64) -> PlaylistEntry {
    if let Some(exact) = sorted.iter().rev().find(|p| p.mode == target_mode) {
        return exact.clone();
    }

    let best = sorted.first().expect("sorted playlist list is non-empty");
    warn!(
        requested_mode = target_mode,
        fallback_mode = best.mode,
        "requested quality is not available; falling back to next best quality"
    );
    best.clone()
}

/// Merge, sort, and select in one call — the full algorithm behind
/// `WebSocketControlChannel::get_hls_information`'s playlist pick (§4.3).
pub fn pick_url(hls_info: &Value, target_mode: i64) -> Option<String> {
    let merged = merge_playlists(hls_info);
    if merged.is_empty() {
        return None;
    }
    let sorted = sort_playlists(merged);
    Some(select_playlist(&sorted, target_mode).url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_mode_match_wins() {
        let info = json!({
            "playlists": [
                {"url": "A", "mode": 52},
                {"url": "B", "mode": 40},
            ]
        });
        assert_eq!(pick_url(&info, 52).unwrap(), "A");
    }

    #[test]
    fn falls_back_to_best_when_no_exact_match() {
        let info = json!({
            "playlists": [
                {"url": "A", "mode": 52},
                {"url": "B", "mode": 40},
            ]
        });
        // target mode 50 (3Mbps/low) has no exact match; best ranked is A (52).
        assert_eq!(pick_url(&info, 50).unwrap(), "A");
    }

    #[test]
    fn audio_only_ranks_below_all_video_modes() {
        let merged = vec![
            PlaylistEntry { url: "video".into(), mode: 10 },
            PlaylistEntry { url: "audio".into(), mode: 91 },
        ];
        let sorted = sort_playlists(merged);
        assert_eq!(sorted[0].url, "video");
        assert_eq!(sorted[1].url, "audio");
    }

    #[test]
    fn audio_only_selection() {
        let info = json!({"playlists": [{"url": "C", "mode": 90}]});
        assert_eq!(pick_url(&info, 90).unwrap(), "C");
    }

    #[test]
    fn merges_all_three_latency_buckets() {
        let info = json!({
            "playlists": [{"url": "a", "mode": 50}],
            "playlists_high_latency": [{"url": "b", "mode": 51}],
            "playlists_middle_latency": [{"url": "c", "mode": 52}],
        });
        let merged = merge_playlists(&info);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn empty_playlists_yields_none() {
        assert!(pick_url(&json!({}), 52).is_none());
    }
}
