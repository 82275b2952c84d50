//! Live video: the HLS playlist opens in its own mpv window, independent of
//! the shared audio player.

use tokio::process::Child;
use tracing::{debug, info};

pub struct VideoLauncher {
    url: String,
    title: String,
    child: Option<Child>,
}

impl VideoLauncher {
    pub fn new(url: String, title: String) -> Self {
        Self {
            url,
            title,
            child: None,
        }
    }

    /// Open the video window, replacing one that is already open.
    pub async fn open(&mut self) -> anyhow::Result<()> {
        self.close().await;
        let binary = radiouas_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("video: opening {}", self.url);
        let child = tokio::process::Command::new(binary)
            .args(video_args(&self.url, &self.title))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.child = Some(child);
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("video: kill failed: {}", e);
            }
        }
    }
}

fn video_args(url: &str, title: &str) -> Vec<String> {
    vec![
        "--force-window=immediate".into(),
        "--no-terminal".into(),
        "--keep-open=no".into(),
        format!("--title={}", title),
        url.to_string(),
    ]
}
