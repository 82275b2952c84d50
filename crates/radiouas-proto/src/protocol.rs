use serde::{Deserialize, Serialize};

use crate::catalog::EpisodeRef;
use crate::playback::MediaItem;

/// Current protocol version. Bump this when the wire format changes in a
/// breaking way. Clients check it on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body accepted from the wire.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Why [`Message::decode`] could not return a message.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer does not yet hold a whole frame.
    #[error("incomplete frame")]
    Incomplete,
    /// The length header exceeds [`MAX_FRAME_LEN`]. The stream cannot be
    /// resynchronised after this.
    #[error("frame of {len} bytes exceeds the limit of {} bytes", MAX_FRAME_LEN)]
    TooLarge { len: usize },
    /// A whole frame arrived but its body is not a message. `consumed` bytes
    /// can be skipped to reach the next frame.
    #[error("invalid frame body: {source}")]
    Invalid {
        consumed: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Play the live stream, or toggle it when it is already loaded.
    PlayLive,
    /// Play an on-demand episode, or toggle it when it is already loaded.
    PlayEpisode { episode: EpisodeRef },
    Toggle,
    /// Seek to a fraction (0.0..=1.0) of the loaded episode.
    Seek { fraction: f32 },
    Stop,
    /// Open the live video stream in its own window.
    OpenVideo,
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: PlaybackState,
    },
    State {
        data: PlaybackState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing loaded
    Loading, // loadfile sent or rebuffering
    Playing, // core-idle=false, audio flowing
    Paused,
}

/// Health of the mpv process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineHealth {
    /// mpv has not been started yet.
    #[default]
    Absent,
    Starting,
    Running,
    /// Process exited, socket closed or the last command failed.
    Dead(String),
}

/// What the station is airing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub program: String,
    pub production: String,
}

/// Snapshot of the shared player handed to every observer. `rev` increases on
/// every change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaybackState {
    #[serde(default)]
    pub rev: u64,
    pub status: PlaybackStatus,
    pub title: String,
    pub subtitle: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub is_playing: bool,
    pub is_loading: bool,
    /// Progress reads 0 whenever this is true.
    pub is_live: bool,
    /// 0.0..=1.0 of the loaded episode.
    pub progress: f32,
    #[serde(default)]
    pub position_secs: Option<f64>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub current_item: Option<MediaItem>,
    #[serde(default)]
    pub engine_health: EngineHealth,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        let Some(header) = data.get(..4) else {
            return Err(FrameError::Incomplete);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge { len });
        }
        let Some(body) = data.get(4..4 + len) else {
            return Err(FrameError::Incomplete);
        };
        let msg = serde_json::from_slice(body).map_err(|source| FrameError::Invalid {
            consumed: 4 + len,
            source,
        })?;
        Ok((msg, 4 + len))
    }
}
