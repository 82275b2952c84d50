#![allow(dead_code)]

use axum::Router;
use std::net::SocketAddr;

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });
    format!("http://{}", addr)
}

pub const DAILY_SCHEDULE: &str = r#"[
  {"ID":1,"name":"Buenos Días","subtitle":"Cabina","slug":"music",
   "startTime":"07:00:00","endTime":"09:00:00","dayOfWeek":1},
  {"ID":2,"name":"Noticias UAS","subtitle":"Redacción","slug":"news",
   "startTime":"23:00:00","endTime":"01:00:00","dayOfWeek":1}
]"#;

pub const POSTS: &str = r#"[
  {"id":501,"title":{"rendered":"Rector inaugura ciclo &#8220;Cultura&#8221;"},
   "content":{"rendered":"<p>La Universidad Aut&oacute;noma de Sinaloa inaugur&oacute; el ciclo.</p>"},
   "jetpack_featured_media_url":"https://radio.example/img.jpg"},
  {"id":502,"title":{"rendered":"Sin imagen"},"content":{"rendered":"<p>Texto</p>"},
   "jetpack_featured_media_url":""}
]"#;
