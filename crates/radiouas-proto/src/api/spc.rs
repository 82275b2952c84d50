//! Station programming service: daily schedule and now-playing.

use serde::Deserialize;

use super::{build_client, fetch_json, normalize_base, Result};
use crate::protocol::NowPlaying;
use crate::schedule::{DaySchedule, ScheduleItem};

/// `/api/schedule/now` body. Either field may be missing or empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NowPlayingResponse {
    #[serde(default)]
    pub programa: Option<String>,
    #[serde(default)]
    pub produccion: Option<String>,
}

impl NowPlayingResponse {
    /// Fill missing or blank fields from `fallback`.
    pub fn or(self, fallback: &NowPlaying) -> NowPlaying {
        fn pick(value: Option<String>, default: &str) -> String {
            match value {
                Some(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => default.to_string(),
            }
        }
        NowPlaying {
            program: pick(self.programa, &fallback.program),
            production: pick(self.produccion, &fallback.production),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl SpcClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: build_client(false)?,
            base_url: normalize_base(base_url),
        })
    }

    pub async fn daily_schedule(&self, day: u8) -> Result<Vec<ScheduleItem>> {
        let url = format!("{}api/schedule/daily", self.base_url);
        let request = self
            .http
            .get(url)
            .query(&[("source", "mobile-app".to_string()), ("day", day.to_string())]);
        fetch_json(request).await
    }

    /// Schedule for `day`; any failure becomes an empty schedule.
    pub async fn day_schedule(&self, day: u8) -> DaySchedule {
        match self.daily_schedule(day).await {
            Ok(items) => DaySchedule::new(day, items),
            Err(e) => {
                tracing::warn!("Schedule for day {} unavailable: {}", day, e);
                DaySchedule::new(day, Vec::new())
            }
        }
    }

    pub async fn now_playing(&self) -> Result<NowPlayingResponse> {
        let url = format!("{}api/schedule/now", self.base_url);
        fetch_json(self.http.get(url).query(&[("format", "json")])).await
    }
}
