//! Periodic now-playing refresh. A failed fetch sends nothing, so the core
//! keeps showing the last value it had.

use std::time::Duration;

use radiouas_proto::api::SpcClient;
use radiouas_proto::protocol::NowPlaying;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::DaemonEvent;

pub fn spawn_refresher(
    spc: SpcClient,
    defaults: NowPlaying,
    period: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("now-playing refresher stopped");
                    break;
                }
                _ = interval.tick() => {
                    match spc.now_playing().await {
                        Ok(resp) => {
                            let now_playing = resp.or(&defaults);
                            if event_tx.send(DaemonEvent::NowPlaying(now_playing)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("now-playing unavailable, keeping last value: {}", e),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};

    fn defaults() -> NowPlaying {
        NowPlaying {
            program: "Radio UAS - 96.1 FM".into(),
            production: "Señal En Vivo".into(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_refresher_sends_metadata() {
        let app = Router::new().route(
            "/api/schedule/now",
            get(|| async { Json(serde_json::json!({"programa": "Enlace Universitario"})) }),
        );
        let base = serve(app).await;
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = spawn_refresher(
            SpcClient::new(&base).unwrap(),
            defaults(),
            Duration::from_secs(60),
            tx,
            cancel.clone(),
        );

        match rx.recv().await {
            Some(DaemonEvent::NowPlaying(np)) => {
                assert_eq!(np.program, "Enlace Universitario");
                assert_eq!(np.production, "Señal En Vivo");
            }
            other => panic!("unexpected {:?}", other),
        }
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_fetch_sends_nothing() {
        let app = Router::new().route(
            "/api/schedule/now",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(app).await;
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = spawn_refresher(
            SpcClient::new(&base).unwrap(),
            defaults(),
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        );

        let got = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(got.is_err(), "expected no event, got {:?}", got);
        cancel.cancel();
        task.await.unwrap();
    }
}
