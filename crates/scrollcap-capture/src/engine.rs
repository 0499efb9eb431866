//! Headless-Chromium implementation of the capture engine.
//!
//! One shared browser is launched at startup; each job opens its own page,
//! navigates with failure classification, screencasts while a synthesized
//! scroll gesture walks the full page height, and hands the collected
//! frames to the encoder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::SynthesizeScrollGestureParams;
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams,
    StopScreencastParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scrollcap_core::{defaults, CaptureEngine, CaptureSession, Error, FailureKind, Result};

use crate::encode;

/// Scroll distance left below the fold, as the page reports it.
const SCROLL_DISTANCE_JS: &str =
    "(document.documentElement.scrollHeight || document.body.scrollHeight) - window.innerHeight";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub nav_timeout: Duration,
    pub encode_timeout: Duration,
    pub frame_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport_width: defaults::VIEWPORT_WIDTH,
            viewport_height: defaults::VIEWPORT_HEIGHT,
            nav_timeout: Duration::from_secs(defaults::NAV_TIMEOUT_SECS),
            encode_timeout: Duration::from_secs(defaults::ENCODE_TIMEOUT_SECS),
            frame_rate: defaults::CAPTURE_FRAME_RATE,
        }
    }
}

impl CaptureConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CAPTURE_NAV_TIMEOUT_SECS` | `30` | Navigation deadline |
    /// | `CAPTURE_ENCODE_TIMEOUT_SECS` | `120` | ffmpeg assembly deadline |
    /// | `CAPTURE_FRAME_RATE` | `20` | Assembled video frame rate |
    /// | `CAPTURE_VIEWPORT_WIDTH` | `1920` | Browser viewport width |
    /// | `CAPTURE_VIEWPORT_HEIGHT` | `1080` | Browser viewport height |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            viewport_width: env_u32("CAPTURE_VIEWPORT_WIDTH", defaults.viewport_width),
            viewport_height: env_u32("CAPTURE_VIEWPORT_HEIGHT", defaults.viewport_height),
            nav_timeout: Duration::from_secs(env_u64(
                "CAPTURE_NAV_TIMEOUT_SECS",
                defaults.nav_timeout.as_secs(),
            )),
            encode_timeout: Duration::from_secs(env_u64(
                "CAPTURE_ENCODE_TIMEOUT_SECS",
                defaults.encode_timeout.as_secs(),
            )),
            frame_rate: env_u32("CAPTURE_FRAME_RATE", defaults.frame_rate),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Classify a failed navigation by the error text the browser reports.
fn classify_nav_failure(message: &str) -> FailureKind {
    if message.contains("ERR_NAME_NOT_RESOLVED") || message.contains("invalid URL") {
        FailureKind::InvalidUrl
    } else if message.contains("ERR_CONNECTION")
        || message.contains("ERR_ADDRESS")
        || message.contains("ERR_TIMED_OUT")
    {
        FailureKind::SiteDown
    } else {
        FailureKind::Unknown
    }
}

fn engine_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Engine(format!("{context}: {e}"))
}

/// Shared headless browser implementing [`CaptureEngine`].
pub struct ChromiumEngine {
    browser: Browser,
    config: CaptureConfig,
    event_loop: tokio::task::JoinHandle<()>,
}

impl ChromiumEngine {
    /// Launch the browser. Failure here is fatal to the process: without an
    /// engine the dispatcher must not accept work.
    pub async fn launch(config: CaptureConfig) -> Result<Self> {
        encode::check_ffmpeg().await?;

        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                ..Default::default()
            })
            .build()
            .map_err(Error::Engine)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| engine_err("browser launch failed", e))?;

        // The handler stream drives all CDP I/O and must be polled for the
        // browser's lifetime.
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser event loop error");
                }
            }
        });

        info!(
            viewport = format!("{}x{}", config.viewport_width, config.viewport_height),
            "headless browser launched"
        );

        Ok(Self {
            browser,
            config,
            event_loop,
        })
    }

    /// Close the browser and stop its event loop.
    pub async fn shutdown(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| engine_err("browser close failed", e))?;
        self.event_loop.abort();
        Ok(())
    }
}

#[async_trait::async_trait]
impl CaptureEngine for ChromiumEngine {
    async fn open(&self, url: &str) -> Result<Box<dyn CaptureSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| engine_err("new page failed", e))?;

        match navigate(&page, url, self.config.nav_timeout).await {
            Ok(()) => Ok(Box::new(ChromiumSession::new(page, self.config.clone()))),
            Err(e) => {
                // the session never existed; close the page ourselves
                if let Err(close_err) = page.close().await {
                    warn!(url, error = %close_err, "page close after failed navigation");
                }
                Err(e)
            }
        }
    }
}

/// Navigate and classify the outcome by what the browser observed.
async fn navigate(page: &Page, url: &str, nav_timeout: Duration) -> Result<()> {
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| engine_err("response listener failed", e))?;

    match tokio::time::timeout(nav_timeout, page.goto(url)).await {
        Err(_) => {
            return Err(Error::Navigation(FailureKind::SiteDown));
        }
        Ok(Err(e)) => {
            return Err(Error::Navigation(classify_nav_failure(&e.to_string())));
        }
        Ok(Ok(_)) => {}
    }

    // The navigation response is the first document-typed response; its
    // status distinguishes a dead page from a dead site.
    if let Some(status) = first_document_status(&mut responses).await {
        debug!(url, status, "navigation response");
        if status == 404 {
            return Err(Error::Navigation(FailureKind::PageNotFound));
        }
        if status >= 500 {
            return Err(Error::Navigation(FailureKind::SiteDown));
        }
    }

    Ok(())
}

async fn first_document_status<S>(events: &mut S) -> Option<i64>
where
    S: Stream<Item = Arc<EventResponseReceived>> + Unpin,
{
    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            event = events.next() => match event {
                Some(event) => {
                    let mime = event.response.mime_type.to_lowercase();
                    if mime.starts_with("text/html") || mime.starts_with("application/xhtml+xml") {
                        return Some(event.response.status);
                    }
                }
                None => return None,
            },
        }
    }
}

/// One page navigation, its screencast frames, and their cleanup.
pub struct ChromiumSession {
    page: Option<Page>,
    config: CaptureConfig,
    frames: Vec<Vec<u8>>,
    runtime: tokio::runtime::Handle,
}

impl ChromiumSession {
    fn new(page: Page, config: CaptureConfig) -> Self {
        Self {
            page: Some(page),
            config,
            frames: Vec::new(),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::Engine("session already closed".to_string()))
    }
}

#[async_trait::async_trait]
impl CaptureSession for ChromiumSession {
    async fn capture(&mut self, speed: u32) -> Result<()> {
        let page = self.page()?;

        let distance: f64 = page
            .evaluate(SCROLL_DISTANCE_JS)
            .await
            .map_err(|e| engine_err("scroll height evaluation failed", e))?
            .into_value()
            .map_err(|e| engine_err("scroll height not a number", e))?;
        let distance = distance.max(0.0);

        let mut frame_events = page
            .event_listener::<EventScreencastFrame>()
            .await
            .map_err(|e| engine_err("screencast listener failed", e))?;

        let collected: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let ack_page = page.clone();
        let collector = tokio::spawn(async move {
            while let Some(frame) = frame_events.next().await {
                match BASE64.decode(&frame.data) {
                    Ok(bytes) => sink.lock().await.push(bytes),
                    Err(e) => warn!(error = %e, "undecodable screencast frame"),
                }
                // unacked frames stall the screencast
                let _ = ack_page
                    .execute(ScreencastFrameAckParams::new(frame.session_id))
                    .await;
            }
        });

        let mut start = StartScreencastParams::default();
        start.format = Some(StartScreencastFormat::Jpeg);
        start.every_nth_frame = Some(1);
        page.execute(start)
            .await
            .map_err(|e| engine_err("screencast start failed", e))?;

        let gesture = SynthesizeScrollGestureParams::builder()
            .x(0.0)
            .y(0.0)
            .y_distance(-distance)
            .speed(speed as i64)
            .build()
            .map_err(Error::Engine)?;
        // resolves once the gesture has run its full distance
        let scroll = page.execute(gesture).await;

        let _ = page.execute(StopScreencastParams::default()).await;
        collector.abort();
        let _ = collector.await;

        scroll.map_err(|e| engine_err("scroll gesture failed", e))?;

        self.frames = std::mem::take(&mut *collected.lock().await);
        debug!(frames = self.frames.len(), distance, "scroll captured");
        Ok(())
    }

    async fn finalize(&mut self, out_dir: &Path) -> Result<String> {
        let frames = std::mem::take(&mut self.frames);
        tokio::fs::create_dir_all(out_dir).await?;
        encode::assemble_webm(
            out_dir,
            &frames,
            self.config.frame_rate,
            self.config.encode_timeout.as_secs(),
        )
        .await?;
        Ok(defaults::ARTIFACT_FILE_NAME.to_string())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            page.close()
                .await
                .map_err(|e| engine_err("page close failed", e))?;
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            // Drop cannot await; hand the close to the runtime.
            self.runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!(error = %e, "page close from drop failed");
                }
            });
        }
    }
}
