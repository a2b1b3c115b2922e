use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ports::TabId;
use crate::track::Track;

/// Raw `{command, data}` message as sent by the content collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

impl Message {
    pub fn new(command: impl Into<String>, data: Value) -> Self {
        Self {
            command: command.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Playback-lifecycle and tab events delivered to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A new track started playing
    Play { track: Option<Track> },
    /// Metadata refresh for the playing track
    UpdateTrack { track: Track },
    /// The playing track reached its end
    Ended { track: Option<Track> },
    /// Playback of the current track was interrupted (skip, seek)
    Abort,
    Pause,
    SetVolume { volume: f32 },
    StopCapture,
    TabUpdated { tab_id: TabId, status: TabStatus },
    TabRemoved { tab_id: TabId },
    WindowRemoved,
}

#[derive(Deserialize)]
struct TrackData {
    track: Option<Track>,
}

#[derive(Deserialize)]
struct VolumeData {
    volume: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabData {
    tab_id: TabId,
    status: Option<TabStatus>,
}

fn data<T: DeserializeOwned>(message: &Message) -> Result<T, String> {
    serde_json::from_value(message.data.clone())
        .map_err(|e| format!("invalid data for {}: {}", message.command, e))
}

fn optional_track(message: &Message) -> Result<Option<Track>, String> {
    if message.data.is_null() {
        return Ok(None);
    }
    Ok(data::<TrackData>(message)?.track)
}

impl TryFrom<Message> for SessionEvent {
    type Error = String;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let event = match message.command.as_str() {
            "play" | "spotifyPlay" => SessionEvent::Play {
                track: optional_track(&message)?,
            },
            "updateTrack" | "spotifyUpdateTrack" => match optional_track(&message)? {
                Some(track) => SessionEvent::UpdateTrack { track },
                None => return Err(format!("{} without a track", message.command)),
            },
            "ended" | "spotifyEnded" => SessionEvent::Ended {
                track: optional_track(&message)?,
            },
            "abort" | "spotifyAbort" => SessionEvent::Abort,
            "pause" | "spotifyPause" => SessionEvent::Pause,
            "setVolume" => SessionEvent::SetVolume {
                volume: data::<VolumeData>(&message)?.volume,
            },
            "stopCapture" => SessionEvent::StopCapture,
            "tabUpdated" => {
                let tab = data::<TabData>(&message)?;
                SessionEvent::TabUpdated {
                    tab_id: tab.tab_id,
                    status: tab.status.unwrap_or(TabStatus::Complete),
                }
            }
            "tabRemoved" => SessionEvent::TabRemoved {
                tab_id: data::<TabData>(&message)?.tab_id,
            },
            "windowRemoved" => SessionEvent::WindowRemoved,
            other => return Err(format!("command {} not yet registered", other)),
        };

        Ok(event)
    }
}
