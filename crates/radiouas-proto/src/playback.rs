//! Playback coordinator: the one shared player's state machine.
//!
//! The coordinator is pure: intents and engine callbacks mutate it and return
//! the [`EngineCommand`]s the owner has to apply to the real player. It never
//! talks to the engine itself, which keeps every transition testable.
//!
//! # States
//! ```text
//!  Idle ──play──▶ Loading(item) ──engine──▶ Playing(item) ⇄ Paused(item)
//!                     ▲                          │
//!                     └──────── rebuffer ────────┘
//! ```
//!
//! Whether the loaded item is the live stream is a property of the item, so a
//! live flag with a podcast loaded cannot be represented. "Same item" is
//! decided by stable id (episode id, or the live source), never by title.

use serde::{Deserialize, Serialize};

use crate::catalog::EpisodeRef;
use crate::protocol::{NowPlaying, PlaybackState, PlaybackStatus};
use crate::titles::format_episode_title;

/// Where a media item comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MediaSource {
    Live,
    Episode { id: String },
}

/// Everything the engine and the observers need about one loaded item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub source: MediaSource,
    pub url: String,
    pub title: String,
    pub subtitle: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl MediaItem {
    pub fn is_live(&self) -> bool {
        self.source == MediaSource::Live
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Playback {
    #[default]
    Idle,
    Loading(MediaItem),
    Playing(MediaItem),
    Paused(MediaItem),
}

impl Playback {
    pub fn item(&self) -> Option<&MediaItem> {
        match self {
            Playback::Idle => None,
            Playback::Loading(item) | Playback::Playing(item) | Playback::Paused(item) => {
                Some(item)
            }
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        match self {
            Playback::Idle => PlaybackStatus::Idle,
            Playback::Loading(_) => PlaybackStatus::Loading,
            Playback::Playing(_) => PlaybackStatus::Playing,
            Playback::Paused(_) => PlaybackStatus::Paused,
        }
    }
}

/// Instructions for the media engine, applied in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Replace whatever is loaded and start playing it.
    Load(MediaItem),
    Pause,
    Resume,
    SeekTo { seconds: f64 },
    Stop,
}

/// What the engine already had loaded when this session attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMedia {
    pub url: String,
    pub title: Option<String>,
    pub paused: bool,
}

/// The live stream as configured for this station.
#[derive(Debug, Clone)]
pub struct LiveStream {
    pub url: String,
    pub cover_url: Option<String>,
}

pub struct Coordinator {
    playback: Playback,
    live: LiveStream,
    now_playing: NowPlaying,
    progress: f32,
    position_secs: Option<f64>,
    duration_secs: Option<f64>,
}

impl Coordinator {
    pub fn new(live: LiveStream, now_playing: NowPlaying) -> Self {
        Self {
            playback: Playback::Idle,
            live,
            now_playing,
            progress: 0.0,
            position_secs: None,
            duration_secs: None,
        }
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    pub fn is_live(&self) -> bool {
        self.playback.item().is_some_and(MediaItem::is_live)
    }

    pub fn progress(&self) -> f32 {
        if self.is_live() {
            0.0
        } else {
            self.progress
        }
    }

    /// Whether the once-per-second progress poll has anything to do.
    pub fn wants_progress(&self) -> bool {
        matches!(&self.playback, Playback::Playing(item) if !item.is_live())
    }

    fn live_item(&self) -> MediaItem {
        MediaItem {
            source: MediaSource::Live,
            url: self.live.url.clone(),
            title: self.now_playing.program.clone(),
            subtitle: self.now_playing.production.clone(),
            cover_url: self.live.cover_url.clone(),
        }
    }

    // ── intents ──────────────────────────────────────────────────────────────

    /// Play the live stream, or pause/resume it if it is already loaded.
    pub fn play_live(&mut self) -> Vec<EngineCommand> {
        if self.is_live() {
            return self.flip();
        }
        let item = self.live_item();
        self.replace(item)
    }

    /// Play `episode`, or pause/resume it if it is already loaded.
    pub fn play_episode(&mut self, episode: &EpisodeRef) -> Vec<EngineCommand> {
        let wanted = MediaSource::Episode {
            id: episode.id.clone(),
        };
        if self.playback.item().map(|i| &i.source) == Some(&wanted) {
            return self.flip();
        }
        let item = MediaItem {
            source: wanted,
            url: episode.stream_url.clone(),
            title: format_episode_title(&episode.name),
            subtitle: episode.album_name.clone(),
            cover_url: episode.cover_url.clone(),
        };
        self.replace(item)
    }

    /// Play/pause button: starts the live stream when nothing is loaded.
    pub fn toggle(&mut self) -> Vec<EngineCommand> {
        match self.playback {
            Playback::Idle => self.play_live(),
            _ => self.flip(),
        }
    }

    /// Seek to `fraction` of the known duration. Ignored for the live stream
    /// or before the engine has reported a duration.
    pub fn seek(&mut self, fraction: f32) -> Option<EngineCommand> {
        if self.is_live() || self.playback.item().is_none() {
            return None;
        }
        let duration = self.duration_secs.filter(|d| *d > 0.0)?;
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let seconds = duration * f64::from(fraction);
        // Show the target right away; the next poll confirms it.
        self.progress = fraction;
        self.position_secs = Some(seconds);
        Some(EngineCommand::SeekTo { seconds })
    }

    pub fn stop(&mut self) -> Vec<EngineCommand> {
        if self.playback == Playback::Idle {
            return Vec::new();
        }
        self.unload();
        vec![EngineCommand::Stop]
    }

    fn replace(&mut self, item: MediaItem) -> Vec<EngineCommand> {
        // Display fields are swapped together with the item, before the engine
        // sees it, so observers never pair the new item with the old title.
        self.progress = 0.0;
        self.position_secs = None;
        self.duration_secs = None;
        self.playback = Playback::Loading(item.clone());
        vec![EngineCommand::Load(item)]
    }

    fn flip(&mut self) -> Vec<EngineCommand> {
        match std::mem::take(&mut self.playback) {
            Playback::Idle => Vec::new(),
            Playback::Paused(item) => {
                self.playback = Playback::Loading(item);
                vec![EngineCommand::Resume]
            }
            Playback::Playing(item) | Playback::Loading(item) => {
                self.playback = Playback::Paused(item);
                vec![EngineCommand::Pause]
            }
        }
    }

    fn unload(&mut self) {
        self.playback = Playback::Idle;
        self.progress = 0.0;
        self.position_secs = None;
        self.duration_secs = None;
    }

    // ── engine callbacks ─────────────────────────────────────────────────────

    /// Derive the state from the engine's pause flag and whether audio is
    /// flowing (`core_idle == false`).
    pub fn on_engine_status(&mut self, paused: bool, core_idle: bool) {
        self.playback = match std::mem::take(&mut self.playback) {
            Playback::Idle => Playback::Idle,
            Playback::Loading(item) | Playback::Playing(item) | Playback::Paused(item) => {
                if paused {
                    Playback::Paused(item)
                } else if core_idle {
                    Playback::Loading(item)
                } else {
                    Playback::Playing(item)
                }
            }
        };
    }

    /// Fold in a position/duration sample from the progress poll.
    pub fn on_timeline(&mut self, position_secs: Option<f64>, duration_secs: Option<f64>) {
        if self.is_live() {
            self.progress = 0.0;
            self.position_secs = None;
            self.duration_secs = None;
            return;
        }
        if self.playback.item().is_none() {
            return;
        }
        if let Some(d) = duration_secs.filter(|d| *d > 0.0) {
            self.duration_secs = Some(d);
        }
        if let Some(p) = position_secs {
            self.position_secs = Some(p);
        }
        if !matches!(self.playback, Playback::Playing(_)) {
            return;
        }
        if let (Some(p), Some(d)) = (self.position_secs, self.duration_secs) {
            self.progress = (p / d).clamp(0.0, 1.0) as f32;
        }
    }

    /// The loaded item played to its end.
    pub fn on_finished(&mut self) {
        self.unload();
    }

    /// The engine failed to play the loaded item.
    pub fn on_error(&mut self) {
        self.unload();
    }

    /// New now-playing metadata. Shown immediately when the live stream is
    /// loaded; otherwise kept for the next `play_live`.
    pub fn set_now_playing(&mut self, now_playing: NowPlaying) {
        self.now_playing = now_playing;
        let (program, production) = (
            self.now_playing.program.clone(),
            self.now_playing.production.clone(),
        );
        if let Playback::Loading(item) | Playback::Playing(item) | Playback::Paused(item) =
            &mut self.playback
        {
            if item.is_live() {
                item.title = program;
                item.subtitle = production;
            }
        }
    }

    /// Session start: adopt whatever the engine already has loaded. The live
    /// stream is recognised by URL; `last_item` is the item this daemon
    /// loaded last time, used to recover episode metadata.
    pub fn reconcile(&mut self, loaded: Option<LoadedMedia>, last_item: Option<MediaItem>) {
        let Some(loaded) = loaded else {
            self.unload();
            return;
        };
        let item = if loaded.url == self.live.url {
            self.live_item()
        } else {
            match last_item {
                Some(item) if item.url == loaded.url && !item.is_live() => item,
                _ => MediaItem {
                    source: MediaSource::Episode {
                        id: loaded.url.clone(),
                    },
                    url: loaded.url.clone(),
                    title: loaded.title.clone().unwrap_or_else(|| loaded.url.clone()),
                    subtitle: String::new(),
                    cover_url: None,
                },
            }
        };
        self.progress = 0.0;
        self.position_secs = None;
        self.duration_secs = None;
        self.playback = if loaded.paused {
            Playback::Paused(item)
        } else {
            Playback::Loading(item)
        };
    }

    /// Snapshot for observers. `rev` and engine health are owned by the
    /// state manager and filled in there.
    pub fn snapshot(&self) -> PlaybackState {
        let item = self.playback.item();
        let live = self.is_live();
        PlaybackState {
            rev: 0,
            status: self.playback.status(),
            title: item
                .map(|i| i.title.clone())
                .unwrap_or_else(|| self.now_playing.program.clone()),
            subtitle: item
                .map(|i| i.subtitle.clone())
                .unwrap_or_else(|| self.now_playing.production.clone()),
            cover_url: match item {
                Some(i) => i.cover_url.clone(),
                None => self.live.cover_url.clone(),
            },
            is_playing: matches!(self.playback, Playback::Playing(_)),
            is_loading: matches!(self.playback, Playback::Loading(_)),
            // Nothing loaded shows the station defaults, i.e. the live stream.
            is_live: live || item.is_none(),
            progress: self.progress(),
            position_secs: if live { None } else { self.position_secs },
            duration_secs: if live { None } else { self.duration_secs },
            current_item: item.cloned(),
            engine_health: Default::default(),
        }
    }
}
