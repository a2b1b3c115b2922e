use serde::{Deserialize, Serialize};

/// What kind of playback item a track is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Normal,
    /// Ads are captured like any other track but never finished
    Advertisement,
}

/// Metadata for one playback item, as reported by the content collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "TrackWire")]
pub struct Track {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
    pub release_date: Option<String>,
    pub release_year: Option<i32>,
    pub duration_ms: u64,
    pub cover_url: String,
    /// Target bitrate; falls back to the worker's configured bitrate
    pub kbps: Option<u16>,
    /// Streaming service identifier, written as a TXXX frame
    pub external_id: Option<String>,
    /// Playback start, milliseconds since the unix epoch
    pub start_time: Option<u64>,
    /// Playback position when the track was reported
    pub progress_ms: Option<u64>,
    pub kind: TrackKind,
    /// Optional download sub-directory (album or playlist name)
    pub directory: Option<String>,
    pub playlist: Option<String>,
    /// Artifact reference, set once the track has been encoded
    pub url: Option<String>,
}

impl Track {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            duration_ms,
            ..Default::default()
        }
    }

    pub fn is_advertisement(&self) -> bool {
        self.kind == TrackKind::Advertisement
    }
}

/// Wire shape accepted from the collaborator, including legacy field names
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TrackWire {
    artist: String,
    title: String,
    album: Option<String>,
    album_artist: Option<String>,
    disc_number: Option<u32>,
    track_number: Option<u32>,
    #[serde(alias = "albumReleaseDate")]
    release_date: Option<String>,
    #[serde(alias = "albumReleaseYear")]
    release_year: Option<i32>,
    duration_ms: Option<u64>,
    /// Legacy duration in whole seconds
    duration: Option<u64>,
    #[serde(alias = "cover")]
    cover_url: String,
    kbps: Option<u16>,
    #[serde(alias = "spotifyId")]
    external_id: Option<String>,
    start_time: Option<u64>,
    #[serde(alias = "progress")]
    progress_ms: Option<u64>,
    kind: Option<TrackKind>,
    #[serde(rename = "type")]
    legacy_type: Option<String>,
    directory: Option<String>,
    playlist: Option<String>,
    url: Option<String>,
}

impl From<TrackWire> for Track {
    fn from(wire: TrackWire) -> Self {
        let kind = match (wire.kind, wire.legacy_type.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some("ad")) | (None, Some("advertisement")) => TrackKind::Advertisement,
            _ => TrackKind::Normal,
        };

        let duration_ms = wire
            .duration_ms
            .or_else(|| wire.duration.map(|secs| secs.saturating_mul(1000)))
            .unwrap_or(0);

        Self {
            artist: wire.artist,
            title: wire.title,
            album: wire.album,
            album_artist: wire.album_artist,
            disc_number: wire.disc_number,
            track_number: wire.track_number,
            release_date: wire.release_date,
            release_year: wire.release_year,
            duration_ms,
            cover_url: wire.cover_url,
            kbps: wire.kbps,
            external_id: wire.external_id,
            start_time: wire.start_time,
            progress_ms: wire.progress_ms,
            kind,
            directory: wire.directory,
            playlist: wire.playlist,
            url: wire.url,
        }
    }
}
