//! ID3v2.3 tagging of encoded tracks.
//!
//! Frames are always written in the same order: artist, title, length, cover,
//! then the optional album/date/numbering frames and the external identifier.
//! Optional fields are skipped when absent, empty or zero.

use id3::frame::{ExtendedText, Picture, PictureType};
use id3::{Content, Frame, Tag, TagLike, Version};

use super::cover::CoverArt;
use crate::error::{CaptureError, CaptureResult};
use crate::track::Track;

/// TXXX description carrying the streaming service id
pub const EXTERNAL_ID_DESCRIPTION: &str = "SPOTIFY_ID";

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Build the tag for `track` in the fixed frame order
pub fn build_tag(track: &Track, cover: Option<&CoverArt>) -> Tag {
    let mut tag = Tag::new();

    tag.set_artist(track.artist.as_str());
    tag.set_title(track.title.as_str());
    tag.set_duration(u32::try_from(track.duration_ms).unwrap_or(u32::MAX));

    if let Some(cover) = cover.filter(|c| !c.is_empty()) {
        let picture = Picture {
            mime_type: cover.mime_type.clone(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: cover.data.clone(),
        };
        tag.add_frame(Frame::with_content("APIC", Content::Picture(picture)));
    }

    if let Some(album) = present(&track.album) {
        tag.set_album(album);
    }

    if let Some(album_artist) = present(&track.album_artist) {
        tag.set_album_artist(album_artist);
    }

    if let Some(date) = present(&track.release_date) {
        tag.set_text("TDAT", date);
    }

    if let Some(year) = track.release_year.filter(|y| *y != 0) {
        tag.set_year(year);
    }

    if let Some(disc) = track.disc_number.filter(|n| *n != 0) {
        tag.set_disc(disc);
    }

    if let Some(number) = track.track_number.filter(|n| *n != 0) {
        tag.set_track(number);
    }

    if let Some(id) = present(&track.external_id) {
        let text = ExtendedText {
            description: EXTERNAL_ID_DESCRIPTION.to_string(),
            value: id.to_string(),
        };
        tag.add_frame(Frame::with_content("TXXX", Content::ExtendedText(text)));
    }

    tag
}

/// Prefix `payload` with the ID3 tag for `track`
pub fn apply_tags(payload: &[u8], track: &Track, cover: Option<&CoverArt>) -> CaptureResult<Vec<u8>> {
    let tag = build_tag(track, cover);

    let mut tagged = Vec::with_capacity(payload.len() + 1024);
    tag.write_to(&mut tagged, Version::Id3v23)
        .map_err(|e| CaptureError::Encoding(format!("Failed to write ID3 tag: {}", e)))?;
    tagged.extend_from_slice(payload);

    Ok(tagged)
}
