use crate::playback::MediaItem;
use crate::protocol::{EngineHealth, NowPlaying, PlaybackState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// What survives a daemon restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Last now-playing metadata fetched, shown until a fresh fetch succeeds.
    #[serde(default)]
    pub now_playing: Option<NowPlaying>,
    /// Last item handed to the player, used to recognise it on reconnect.
    #[serde(default)]
    pub last_item: Option<MediaItem>,
}

/// Holds the published playback snapshot. Only the daemon core writes to it;
/// everyone else reads copies.
pub struct StateManager {
    state: RwLock<PlaybackState>,
    persistent: RwLock<PersistentState>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);
        Self {
            state: RwLock::new(PlaybackState {
                rev: 1,
                ..Default::default()
            }),
            persistent: RwLock::new(persistent),
            state_file,
        }
    }

    pub async fn get_state(&self) -> PlaybackState {
        self.state.read().await.clone()
    }

    pub async fn persistent(&self) -> PersistentState {
        self.persistent.read().await.clone()
    }

    /// Replace the snapshot with `next`, keeping the engine health and bumping
    /// `rev`. Returns the new rev, or `None` when nothing changed.
    pub async fn publish(&self, mut next: PlaybackState) -> Option<u64> {
        let mut state = self.state.write().await;
        next.rev = state.rev;
        next.engine_health = state.engine_health.clone();
        if *state == next {
            return None;
        }
        next.rev += 1;
        *state = next;
        Some(state.rev)
    }

    pub async fn set_engine_health(&self, health: EngineHealth) -> Option<u64> {
        let mut state = self.state.write().await;
        if state.engine_health == health {
            return None;
        }
        state.engine_health = health;
        state.rev += 1;
        Some(state.rev)
    }

    pub async fn remember_now_playing(&self, now_playing: NowPlaying) -> anyhow::Result<()> {
        {
            let mut persistent = self.persistent.write().await;
            if persistent.now_playing.as_ref() == Some(&now_playing) {
                return Ok(());
            }
            persistent.now_playing = Some(now_playing);
        }
        self.save().await
    }

    pub async fn remember_item(&self, item: Option<MediaItem>) -> anyhow::Result<()> {
        {
            let mut persistent = self.persistent.write().await;
            if persistent.last_item == item {
                return Ok(());
            }
            persistent.last_item = item;
        }
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let json = {
            let persistent = self.persistent.read().await;
            serde_json::to_string_pretty(&*persistent)?
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        let Ok(content) = std::fs::read_to_string(state_file) else {
            return PersistentState::default();
        };
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(persistent) => persistent,
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {}", state_file.display(), e);
                PersistentState::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::MediaSource;
    use crate::protocol::PlaybackStatus;

    fn live_item() -> MediaItem {
        MediaItem {
            source: MediaSource::Live,
            url: "https://stream/live".into(),
            title: "Radio UAS".into(),
            subtitle: "Señal En Vivo".into(),
            cover_url: None,
        }
    }

    #[tokio::test]
    async fn test_publish_bumps_rev_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StateManager::new(dir.path().join("state.json"));
        assert_eq!(mgr.get_state().await.rev, 1);

        let next = PlaybackState {
            status: PlaybackStatus::Loading,
            is_loading: true,
            title: "Radio UAS".into(),
            ..Default::default()
        };
        assert_eq!(mgr.publish(next.clone()).await, Some(2));
        assert_eq!(mgr.publish(next).await, None);
        assert_eq!(mgr.get_state().await.title, "Radio UAS");
    }

    #[tokio::test]
    async fn test_publish_keeps_engine_health() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StateManager::new(dir.path().join("state.json"));
        assert_eq!(mgr.set_engine_health(EngineHealth::Running).await, Some(2));
        assert_eq!(mgr.set_engine_health(EngineHealth::Running).await, None);
        mgr.publish(PlaybackState {
            title: "x".into(),
            ..Default::default()
        })
        .await;
        assert_eq!(mgr.get_state().await.engine_health, EngineHealth::Running);
    }

    #[tokio::test]
    async fn test_persistent_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        {
            let mgr = StateManager::new(path.clone());
            mgr.remember_now_playing(NowPlaying {
                program: "Noticias".into(),
                production: "Redacción".into(),
            })
            .await
            .unwrap();
            mgr.remember_item(Some(live_item())).await.unwrap();
        }
        let mgr = StateManager::new(path);
        let persistent = mgr.persistent().await;
        assert_eq!(persistent.now_playing.unwrap().program, "Noticias");
        assert_eq!(persistent.last_item, Some(live_item()));
    }

    #[tokio::test]
    async fn test_corrupt_state_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let mgr = StateManager::new(path);
        assert_eq!(mgr.persistent().await, PersistentState::default());
    }
}
