//! Session configuration — the recognized options of spec.md §3, plus the
//! `STREAM_QUALITY`/`STREAM_LATENCY` mode-packing tables of §3/§8 (I5, I6).

use std::path::PathBuf;
use std::time::Duration;

/// Requested stream quality. Packs into the tens digit group of a playlist
/// `mode` (§3): `150Kbps=10, 400Kbps=20, 1.2Mbps=30, 2Mbps=40, 3Mbps=50,
/// sound=90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Kbps150,
    Kbps400,
    Mbps1_2,
    Mbps2,
    #[default]
    Mbps3,
    Sound,
}

impl Quality {
    pub const fn tens(self) -> i64 {
        match self {
            Self::Kbps150 => 10,
            Self::Kbps400 => 20,
            Self::Mbps1_2 => 30,
            Self::Mbps2 => 40,
            Self::Mbps3 => 50,
            Self::Sound => 90,
        }
    }

    /// CLI/config spelling, matching the original's `--quality` choices.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kbps150 => "150Kbps",
            Self::Kbps400 => "400Kbps",
            Self::Mbps1_2 => "1.2Mbps",
            Self::Mbps2 => "2Mbps",
            Self::Mbps3 => "3Mbps",
            Self::Sound => "sound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "150Kbps" => Self::Kbps150,
            "400Kbps" => Self::Kbps400,
            "1.2Mbps" => Self::Mbps1_2,
            "2Mbps" => Self::Mbps2,
            "3Mbps" => Self::Mbps3,
            "sound" => Self::Sound,
            _ => return None,
        })
    }

    pub fn is_audio_only(self) -> bool {
        matches!(self, Self::Sound)
    }
}

/// Requested stream latency. Packs into the ones digit of a playlist `mode`:
/// `low=0, high=1, mid=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Latency {
    Low,
    High,
    #[default]
    Mid,
}

impl Latency {
    pub const fn ones(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::High => 1,
            Self::Mid => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
            Self::Mid => "mid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Self::Low,
            "high" => Self::High,
            "mid" => Self::Mid,
            _ => return None,
        })
    }
}

/// Target `mode` for a given quality+latency pair (§3: "The requested
/// `(quality,latency)` maps to a single target `mode = quality_tens +
/// latency_ones`").
pub fn target_mode(quality: Quality, latency: Latency) -> i64 {
    quality.tens() + latency.ones()
}

/// The recognized session options (spec.md §3 "Session configuration").
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub quality: Quality,
    pub latency: Latency,
    /// Parallel segment fetchers (logical tasks, not necessarily OS threads).
    pub threads: usize,
    /// Filename template with tokens `channel_id, channel_name, date, time,
    /// title, ext`.
    pub outtmpl: String,
    pub write_chat: bool,
    pub write_info_json: bool,
    pub write_thumbnail: bool,
    pub dump_websocket: bool,
    pub wait_for_live: bool,
    pub wait_poll_interval: Duration,
    pub cookies_file: Option<PathBuf>,
    pub remux: bool,
    pub keep_intermediates: bool,
    pub extract_audio: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            latency: Latency::default(),
            threads: 1,
            outtmpl: "%(date)s %(title)s (%(channel_name)s).%(ext)s".to_string(),
            write_chat: false,
            write_info_json: false,
            write_thumbnail: false,
            dump_websocket: false,
            wait_for_live: false,
            wait_poll_interval: Duration::from_secs(5),
            cookies_file: None,
            remux: true,
            keep_intermediates: false,
            extract_audio: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Quality::Mbps3, Latency::Mid, 52)]
    #[case(Quality::Mbps3, Latency::Low, 50)]
    #[case(Quality::Sound, Latency::Low, 90)]
    #[case(Quality::Kbps150, Latency::High, 11)]
    fn mode_packing(#[case] q: Quality, #[case] l: Latency, #[case] expected: i64) {
        assert_eq!(target_mode(q, l), expected);
    }

    #[test]
    fn quality_round_trips_through_str() {
        for q in [
            Quality::Kbps150,
            Quality::Kbps400,
            Quality::Mbps1_2,
            Quality::Mbps2,
            Quality::Mbps3,
            Quality::Sound,
        ] {
            assert_eq!(Quality::parse(q.as_str()), Some(q));
        }
    }
}
