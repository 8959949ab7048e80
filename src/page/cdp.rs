//! Chrome DevTools Protocol adapter.
//!
//! Attaches to an already running Chromium (started with
//! `--remote-debugging-port`) and exposes its page as both the script
//! renderer and the capturer.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use image::RgbaImage;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::PageRenderer;
use crate::capture::{CaptureTarget, Capturer};
use crate::error::AutomationError;

/// A page inside a remote-debuggable browser.
pub struct CdpPage {
    page: Page,
    // Kept so the connection stays open for the page's lifetime
    _browser: Browser,
    handler_task: JoinHandle<()>,
}

impl CdpPage {
    /// Connects to `debugger_url` (http or ws) and selects a page.
    ///
    /// With `open_url` a new tab is opened on it; otherwise the first regular
    /// tab already open is used.
    pub async fn connect(debugger_url: &str, open_url: Option<&str>) -> Result<Self> {
        info!("Connecting to browser at {}", debugger_url);
        let (browser, mut handler) = Browser::connect(debugger_url)
            .await
            .with_context(|| format!("Failed to connect to {}", debugger_url))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
            debug!("CDP handler finished");
        });

        let page = match open_url {
            Some(url) => browser
                .new_page(url)
                .await
                .with_context(|| format!("Failed to open {}", url))?,
            None => select_existing_page(&browser).await?,
        };

        if let Ok(Some(url)) = page.url().await {
            info!("Attached to page {}", url);
        }

        Ok(Self {
            page,
            _browser: browser,
            handler_task,
        })
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

async fn select_existing_page(browser: &Browser) -> Result<Page> {
    let pages = browser.pages().await.context("Failed to list pages")?;
    for page in pages {
        let url = page.url().await.ok().flatten().unwrap_or_default();
        if !url.starts_with("devtools://") && !url.starts_with("chrome-extension://") {
            return Ok(page);
        }
    }
    Err(anyhow!("Browser has no open page to attach to"))
}

#[async_trait]
impl PageRenderer for CdpPage {
    async fn run_script(&self, script: &str) -> Result<Option<Value>, AutomationError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .build()
            .map_err(AutomationError::Script)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| AutomationError::Script(e.to_string()))?;

        Ok(result.value().cloned())
    }
}

#[async_trait]
impl Capturer for CdpPage {
    async fn capture(&self, target: CaptureTarget) -> Result<RgbaImage, AutomationError> {
        let mut params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if let CaptureTarget::Region(region) = target {
            // Clip is in CSS pixels; the browser renders it at the device
            // pixel ratio, so the frame comes back in physical pixels.
            params = params.clip(Viewport {
                x: region.x as f64,
                y: region.y as f64,
                width: region.width as f64,
                height: region.height as f64,
                scale: 1.0,
            });
        }

        let png = self
            .page
            .screenshot(params.build())
            .await
            .map_err(|e| AutomationError::CaptureFailure(e.to_string()))?;

        let img = image::load_from_memory(&png)
            .map_err(|e| AutomationError::CaptureFailure(format!("undecodable frame: {}", e)))?
            .to_rgba8();

        debug!("Captured {} as {}x{} frame", target, img.width(), img.height());
        Ok(img)
    }
}
