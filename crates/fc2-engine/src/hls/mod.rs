//! HLS stream capture (C1 + C2, spec.md §4.3-§4.4).

pub mod downloader;
pub mod pipeline;
pub mod playlist;

pub use downloader::HlsDownloader;
pub use playlist::{merge_playlists, pick_url, select_playlist, sort_playlists, PlaylistEntry};
