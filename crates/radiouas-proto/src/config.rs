use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub spc: SpcConfig,
    #[serde(default)]
    pub wordpress: WordPressConfig,
    #[serde(default)]
    pub emby: EmbyConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// The station itself: live streams, branding and wall clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    /// Long-lived Icecast/Shoutcast audio stream.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// HLS playlist for the video signal.
    #[serde(default = "default_video_url")]
    pub video_url: String,
    /// Artwork shown while the live stream is loaded.
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Offset of the station's wall clock from UTC, in minutes.
    /// America/Mazatlan has been a fixed UTC-07:00 since 2022.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Title used while the now-playing endpoint has not answered.
    #[serde(default = "default_program")]
    pub default_program: String,
    #[serde(default = "default_production")]
    pub default_production: String,
}

/// Schedule / now-playing backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpcConfig {
    #[serde(default = "default_spc_base_url")]
    pub base_url: String,
    /// How often the now-playing metadata is refreshed.
    #[serde(default = "default_now_refresh_secs")]
    pub now_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressConfig {
    #[serde(default = "default_wp_base_url")]
    pub base_url: String,
    #[serde(default = "default_wp_category_id")]
    pub category_id: u32,
    #[serde(default = "default_wp_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbyConfig {
    #[serde(default = "default_emby_base_url")]
    pub base_url: String,
    /// API key generated in the Emby dashboard. Empty until configured.
    #[serde(default)]
    pub api_key: String,
    /// Root folder holding the podcast albums.
    #[serde(default = "default_emby_library_id")]
    pub library_id: String,
    #[serde(default = "default_emby_page_size")]
    pub page_size: u32,
    /// The station's media server presents a self-signed certificate.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Progress poll interval while an on-demand item plays.
    #[serde(default = "default_progress_poll_ms")]
    pub progress_poll_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            stream_url: default_stream_url(),
            video_url: default_video_url(),
            cover_url: None,
            utc_offset_minutes: default_utc_offset_minutes(),
            default_program: default_program(),
            default_production: default_production(),
        }
    }
}

impl Default for SpcConfig {
    fn default() -> Self {
        Self {
            base_url: default_spc_base_url(),
            now_refresh_secs: default_now_refresh_secs(),
        }
    }
}

impl Default for WordPressConfig {
    fn default() -> Self {
        Self {
            base_url: default_wp_base_url(),
            category_id: default_wp_category_id(),
            per_page: default_wp_per_page(),
        }
    }
}

impl Default for EmbyConfig {
    fn default() -> Self {
        Self {
            base_url: default_emby_base_url(),
            api_key: String::new(),
            library_id: default_emby_library_id(),
            page_size: default_emby_page_size(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_poll_ms: default_progress_poll_ms(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.8
}

fn default_station_name() -> String {
    "Radio UAS".to_string()
}

fn default_stream_url() -> String {
    "https://stream9.mexiserver.com/8410/stream".to_string()
}

fn default_video_url() -> String {
    "https://stream8.mexiserver.com:2000/hls/radiouasx/radiouasx.m3u8".to_string()
}

fn default_utc_offset_minutes() -> i32 {
    -7 * 60
}

fn default_program() -> String {
    "Radio UAS - 96.1 FM".to_string()
}

fn default_production() -> String {
    "Señal En Vivo".to_string()
}

fn default_spc_base_url() -> String {
    "https://spc.radiouas.org/".to_string()
}

fn default_now_refresh_secs() -> u64 {
    60
}

fn default_wp_base_url() -> String {
    "https://radio.uas.edu.mx/".to_string()
}

fn default_wp_category_id() -> u32 {
    319
}

fn default_wp_per_page() -> u32 {
    10
}

fn default_emby_base_url() -> String {
    "https://emby.radiouas.org:8920/".to_string()
}

fn default_emby_library_id() -> String {
    "5".to_string()
}

fn default_emby_page_size() -> u32 {
    75
}

fn default_progress_poll_ms() -> u64 {
    1000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
