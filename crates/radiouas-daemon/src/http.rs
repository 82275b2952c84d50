use crate::core::DaemonEvent;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use radiouas_proto::api::{ApiError, EmbyClient, SpcClient, WordPressClient};
use radiouas_proto::catalog::{EmbyItem, EpisodePager, EpisodeRef};
use radiouas_proto::news::NewsSummary;
use radiouas_proto::protocol::{Command, PlaybackState};
use radiouas_proto::schedule::{day_name, day_number, is_valid_day, ScheduleItem, StationClock};
use radiouas_proto::state::StateManager;
use radiouas_proto::titles::format_episode_title;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Upstream services the read-only endpoints pull from.
pub struct DataSources {
    pub spc: SpcClient,
    pub emby: EmbyClient,
    pub wordpress: WordPressClient,
    pub clock: StationClock,
    pub page_size: u32,
}

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    data: Arc<DataSources>,
    /// Episode lists per album, grown one page at a time.
    pagers: Arc<Mutex<PagerCache>>,
}

impl HttpState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<DaemonEvent>,
        data: DataSources,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            data: Arc::new(data),
            pagers: Arc::new(Mutex::new(PagerCache::default())),
        }
    }
}

/// Albums whose episode lists are kept between requests.
const MAX_CACHED_ALBUMS: usize = 32;

type SharedPager = Arc<Mutex<EpisodePager>>;

/// Per-album pagers, each behind its own lock, evicting the least recently
/// used album once full.
#[derive(Default)]
struct PagerCache {
    entries: HashMap<String, (u64, SharedPager)>,
    clock: u64,
}

impl PagerCache {
    /// The pager for `album_id`. `reset` starts its list over.
    fn checkout(&mut self, album_id: &str, page_size: u32, reset: bool) -> SharedPager {
        self.clock += 1;
        if reset {
            self.entries.remove(album_id);
        }
        if !self.entries.contains_key(album_id) && self.entries.len() >= MAX_CACHED_ALBUMS {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (used, _))| *used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        let entry = self.entries.entry(album_id.to_string()).or_insert_with(|| {
            (0, Arc::new(Mutex::new(EpisodePager::new(album_id, page_size))))
        });
        entry.0 = self.clock;
        entry.1.clone()
    }
}

#[derive(Debug, thiserror::Error)]
enum HttpError {
    #[error(transparent)]
    Upstream(#[from] ApiError),
    #[error("{0}")]
    BadRequest(String),
    #[error("daemon is shutting down")]
    Unavailable,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::Upstream(e) => {
                error!("HTTP API: upstream error: {}", e);
                StatusCode::BAD_GATEWAY
            }
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/live", post(play_live))
        .route("/api/episode", post(play_episode))
        .route("/api/toggle", post(toggle))
        .route("/api/seek/:permille", post(seek))
        .route("/api/stop", post(stop))
        .route("/api/video", post(open_video))
        .route("/api/schedule", get(schedule))
        .route("/api/schedule/live", get(schedule_live))
        .route("/api/podcasts", get(podcasts))
        .route("/api/podcasts/:id/episodes", get(episodes))
        .route("/api/news", get(news))
        .layer(cors)
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, router(state)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

// ── playback ──────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<PlaybackState> {
    Json(state.state_manager.get_state().await)
}

async fn send_command(state: &HttpState, cmd: Command) -> Result<StatusCode, HttpError> {
    info!("HTTP API: {:?}", cmd);
    state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .map_err(|_| HttpError::Unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

async fn play_live(State(state): State<HttpState>) -> Result<StatusCode, HttpError> {
    send_command(&state, Command::PlayLive).await
}

async fn play_episode(
    State(state): State<HttpState>,
    Json(episode): Json<EpisodeRef>,
) -> Result<StatusCode, HttpError> {
    send_command(&state, Command::PlayEpisode { episode }).await
}

async fn toggle(State(state): State<HttpState>) -> Result<StatusCode, HttpError> {
    send_command(&state, Command::Toggle).await
}

/// Seek position in thousandths of the episode.
async fn seek(
    State(state): State<HttpState>,
    Path(permille): Path<u32>,
) -> Result<StatusCode, HttpError> {
    if permille > 1000 {
        return Err(HttpError::BadRequest(format!(
            "seek position {} is outside 0..=1000",
            permille
        )));
    }
    let fraction = permille as f32 / 1000.0;
    send_command(&state, Command::Seek { fraction }).await
}

async fn stop(State(state): State<HttpState>) -> Result<StatusCode, HttpError> {
    send_command(&state, Command::Stop).await
}

async fn open_video(State(state): State<HttpState>) -> Result<StatusCode, HttpError> {
    send_command(&state, Command::OpenVideo).await
}

// ── schedule ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DayQuery {
    day: Option<u8>,
}

#[derive(Serialize)]
struct ScheduleEntry {
    #[serde(flatten)]
    item: ScheduleItem,
    is_live: bool,
}

#[derive(Serialize)]
struct ScheduleResponse {
    day: u8,
    day_name: &'static str,
    is_today: bool,
    /// Index of the program on air, to scroll to.
    live_index: Option<usize>,
    items: Vec<ScheduleEntry>,
}

async fn schedule(
    State(state): State<HttpState>,
    Query(q): Query<DayQuery>,
) -> Result<Json<ScheduleResponse>, HttpError> {
    let now = state.data.clock.now();
    let day = q.day.unwrap_or_else(|| day_number(&now));
    if !is_valid_day(day) {
        return Err(HttpError::BadRequest(format!("day must be 1..=7, got {}", day)));
    }

    let schedule = state.data.spc.day_schedule(day).await;
    let items = schedule
        .items
        .iter()
        .map(|item| ScheduleEntry {
            item: item.clone(),
            is_live: schedule.is_live(item, &now),
        })
        .collect();

    Ok(Json(ScheduleResponse {
        day,
        day_name: day_name(day).unwrap_or_default(),
        is_today: schedule.is_today(&now),
        live_index: schedule.live_index(&now),
        items,
    }))
}

async fn schedule_live(State(state): State<HttpState>) -> Json<Option<ScheduleItem>> {
    let now = state.data.clock.now();
    let schedule = state.data.spc.day_schedule(day_number(&now)).await;
    Json(schedule.live_item(&now).cloned())
}

// ── podcasts ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RangeQuery {
    #[serde(default)]
    start: u32,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct AlbumSummary {
    id: String,
    name: String,
    album_artist: Option<String>,
    overview: Option<String>,
    image_url: String,
}

async fn podcasts(
    State(state): State<HttpState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<AlbumSummary>>, HttpError> {
    let emby = &state.data.emby;
    let limit = q.limit.unwrap_or(state.data.page_size);
    let albums = emby.albums(q.start, limit).await?;
    let summaries = albums
        .items
        .into_iter()
        .map(|album: EmbyItem| AlbumSummary {
            image_url: emby.urls().image_url(&album.id),
            id: album.id,
            name: album.name,
            album_artist: album.album_artist,
            overview: album.overview,
        })
        .collect();
    Ok(Json(summaries))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: u32,
}

#[derive(Serialize)]
struct EpisodeSummary {
    /// Display title (air date when the name starts with one).
    title: String,
    duration_secs: Option<f64>,
    /// Ready to POST back to `/api/episode`.
    episode: EpisodeRef,
}

#[derive(Serialize)]
struct EpisodePage {
    page: u32,
    items: Vec<EpisodeSummary>,
    has_more: bool,
}

/// Page `n` of an album's episodes. Page 0 starts the list over; later pages
/// extend the accumulated list as far as needed.
async fn episodes(
    State(state): State<HttpState>,
    Path(album_id): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<EpisodePage>, HttpError> {
    let emby = &state.data.emby;
    let size = state.data.page_size.max(1) as usize;
    let start = q.page as usize * size;

    let pager = state
        .pagers
        .lock()
        .await
        .checkout(&album_id, size as u32, q.page == 0);
    let mut pager = pager.lock().await;
    while pager.items().len() < start + size && !pager.is_exhausted() {
        emby.load_next_page(&mut pager).await?;
    }

    let items = pager
        .items()
        .iter()
        .skip(start)
        .take(size)
        .map(|item| EpisodeSummary {
            title: format_episode_title(&item.name),
            duration_secs: item.duration_secs(),
            episode: emby.urls().episode_in_album(item, &album_id),
        })
        .collect();
    let has_more = !pager.is_exhausted() || pager.items().len() > start + size;

    Ok(Json(EpisodePage {
        page: q.page,
        items,
        has_more,
    }))
}

// ── news ──────────────────────────────────────────────────────────────────────

async fn news(State(state): State<HttpState>) -> Result<Json<Vec<NewsSummary>>, HttpError> {
    let posts = state.data.wordpress.posts().await?;
    Ok(Json(posts.iter().map(NewsSummary::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Nothing listens on port 9, so every upstream call fails fast.
    const DEAD: &str = "http://127.0.0.1:9";

    fn data_sources(spc: &str, emby: &str) -> DataSources {
        DataSources {
            spc: SpcClient::new(spc).unwrap(),
            emby: EmbyClient::new(emby, "k", "5", false).unwrap(),
            wordpress: WordPressClient::new(DEAD, 319, 10).unwrap(),
            clock: StationClock::from_offset_minutes(-420).unwrap(),
            page_size: 2,
        }
    }

    struct Fixture {
        app: Router,
        events: mpsc::Receiver<DaemonEvent>,
        state_manager: Arc<StateManager>,
        _dir: tempfile::TempDir,
    }

    fn fixture(data: DataSources) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state_manager = Arc::new(StateManager::new(dir.path().join("state.json")));
        let (event_tx, events) = mpsc::channel(8);
        let app = router(HttpState::new(state_manager.clone(), event_tx, data));
        Fixture {
            app,
            events,
            state_manager,
            _dir: dir,
        }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_state_is_the_published_snapshot() {
        let f = fixture(data_sources(DEAD, DEAD));
        f.state_manager
            .publish(PlaybackState {
                title: "Radio UAS - 96.1 FM".into(),
                is_live: true,
                ..Default::default()
            })
            .await;
        let (status, body) = call(&f.app, "GET", "/api/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Radio UAS - 96.1 FM");
        assert_eq!(body["is_live"], true);
        assert_eq!(body["rev"], 2);
    }

    #[tokio::test]
    async fn test_control_routes_forward_commands() {
        let mut f = fixture(data_sources(DEAD, DEAD));

        let (status, _) = call(&f.app, "POST", "/api/live", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(matches!(
            f.events.recv().await,
            Some(DaemonEvent::ClientCommand(Command::PlayLive))
        ));

        call(&f.app, "POST", "/api/seek/250", None).await;
        match f.events.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Seek { fraction })) => {
                assert_eq!(fraction, 0.25)
            }
            other => panic!("unexpected {:?}", other),
        }

        let episode = json!({"id": "e1", "name": "20240115", "album_name": "Voces",
                             "stream_url": "https://emby/e1.mp3"});
        call(&f.app, "POST", "/api/episode", Some(episode)).await;
        match f.events.recv().await {
            Some(DaemonEvent::ClientCommand(Command::PlayEpisode { episode })) => {
                assert_eq!(episode.id, "e1");
                assert_eq!(episode.cover_url, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_input_is_rejected() {
        let f = fixture(data_sources(DEAD, DEAD));
        let (status, body) = call(&f.app, "POST", "/api/seek/1500", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("1500"));

        let (status, _) = call(&f.app, "GET", "/api/schedule?day=9", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let f = fixture(data_sources(DEAD, DEAD));
        let (status, body) = call(&f.app, "GET", "/api/news", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_failed_schedule_is_empty_not_an_error() {
        let f = fixture(data_sources(DEAD, DEAD));
        let (status, body) = call(&f.app, "GET", "/api/schedule?day=3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["day_name"], "Miércoles");
        assert_eq!(body["items"], json!([]));
    }

    #[tokio::test]
    async fn test_schedule_marks_live_only_today() {
        let spc = serve(Router::new().route(
            "/api/schedule/daily",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let day: u8 = q["day"].parse().unwrap();
                Json(json!([{"ID": 1, "name": "Todo el día", "subtitle": "", "slug": "music",
                             "startTime": "00:00:00", "endTime": "00:00:00", "dayOfWeek": day}]))
            }),
        ))
        .await;
        let f = fixture(data_sources(&spc, DEAD));
        let today = day_number(&StationClock::from_offset_minutes(-420).unwrap().now());
        let other = today % 7 + 1;

        let (_, body) = call(&f.app, "GET", &format!("/api/schedule?day={}", today), None).await;
        assert_eq!(body["items"][0]["is_live"], true);
        assert_eq!(body["items"][0]["startTime"], "00:00:00");
        assert_eq!(body["live_index"], 0);

        let (_, body) = call(&f.app, "GET", &format!("/api/schedule?day={}", other), None).await;
        assert_eq!(body["is_today"], false);
        assert_eq!(body["items"][0]["is_live"], false);
        assert_eq!(body["live_index"], Value::Null);
    }

    #[tokio::test]
    async fn test_episode_pages_accumulate() {
        // Album "A1" holds 3 episodes.
        let emby = serve(Router::new().route(
            "/emby/Items",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let start: usize = q["StartIndex"].parse().unwrap();
                let limit: usize = q["Limit"].parse().unwrap();
                let items: Vec<Value> = (start..(start + limit).min(3))
                    .map(|i| {
                        json!({
                            "Id": format!("e{}", i),
                            "Name": format!("2024030{} Voces", i + 1),
                            "Type": "Audio",
                            "Album": "Voces",
                        })
                    })
                    .collect();
                Json(json!({ "Items": items }))
            }),
        ))
        .await;
        let f = fixture(data_sources(DEAD, &emby));

        let (_, first) = call(&f.app, "GET", "/api/podcasts/A1/episodes", None).await;
        assert_eq!(first["items"].as_array().unwrap().len(), 2);
        assert_eq!(first["items"][0]["title"], "1 de marzo de 2024");
        assert_eq!(first["items"][0]["episode"]["album_name"], "Voces");
        assert_eq!(first["has_more"], true);

        let (_, second) = call(&f.app, "GET", "/api/podcasts/A1/episodes?page=1", None).await;
        assert_eq!(second["items"].as_array().unwrap().len(), 1);
        assert_eq!(second["items"][0]["episode"]["id"], "e2");
        assert_eq!(second["has_more"], false);
    }

    #[test]
    fn test_pager_cache_evicts_least_recently_used() {
        let mut cache = PagerCache::default();
        let first = cache.checkout("a0", 2, false);
        for i in 1..MAX_CACHED_ALBUMS {
            cache.checkout(&format!("a{}", i), 2, false);
        }
        // Touch a0 so a1 becomes the oldest.
        assert!(Arc::ptr_eq(&first, &cache.checkout("a0", 2, false)));

        cache.checkout("new", 2, false);
        assert_eq!(cache.entries.len(), MAX_CACHED_ALBUMS);
        assert!(cache.entries.contains_key("a0"));
        assert!(!cache.entries.contains_key("a1"));

        let reset = cache.checkout("a0", 2, true);
        assert!(!Arc::ptr_eq(&first, &reset));
    }

    #[tokio::test]
    async fn test_slow_album_does_not_block_others() {
        let emby = serve(Router::new().route(
            "/emby/Items",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q["ParentId"] == "slow" {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                }
                Json(json!({ "Items": [] }))
            }),
        ))
        .await;
        let f = fixture(data_sources(DEAD, &emby));

        let app = f.app.clone();
        let slow = tokio::spawn(async move {
            call(&app, "GET", "/api/podcasts/slow/episodes", None).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let (status, body) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            call(&f.app, "GET", "/api/podcasts/fast/episodes", None),
        )
        .await
        .expect("episode request waited on another album");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_more"], false);
        slow.abort();
    }
}
