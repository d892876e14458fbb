//! Handle to the rendered visualization widget.
//!
//! The widget is an external component; the harness only calls the
//! operations its custom element exposes (`flush`, `getTable`,
//! `toggleConfig`, `notifyResize`) and the model's `restore`, all through
//! page-evaluated scripts.

use crate::config::Selectors;
use crate::error::{BrowserError, Result};
use crate::page::Page;
use serde_json::Value;
use tracing::debug;

/// A widget element inside a page.
#[derive(Debug)]
pub struct WidgetHandle<'a> {
    page: &'a Page,
    selector: String,
    container: String,
    model: String,
}

fn encode(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))
}

impl<'a> WidgetHandle<'a> {
    /// Binds to the first element matching `selectors.widget`.
    #[must_use]
    pub fn new(page: &'a Page, selectors: &Selectors) -> Self {
        Self {
            page,
            selector: selectors.widget.clone(),
            container: selectors.widget_container.clone(),
            model: selectors.widget_model.clone(),
        }
    }

    /// Selector the handle resolves on every call.
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    async fn call(&self, method: &str) -> Result<()> {
        debug!("widget.{}()", method);
        let selector = encode(&self.selector)?;
        let method = encode(method)?;
        self.page
            .run(&format!(
                "(async () => {{ \
                    const el = document.querySelector({selector}); \
                    if (!el) throw new Error('widget not found: ' + {selector}); \
                    await el[{method}](); \
                }})()"
            ))
            .await
    }

    /// Waits for the widget to finish any pending render.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the widget is missing or throws.
    pub async fn flush(&self) -> Result<()> {
        self.call("flush").await
    }

    /// Waits for the widget's table to be loaded.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the widget is missing or throws.
    pub async fn get_table(&self) -> Result<()> {
        self.call("getTable").await
    }

    /// Opens or closes the configuration panel.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the widget is missing or throws.
    pub async fn toggle_config(&self) -> Result<()> {
        self.call("toggleConfig").await
    }

    /// Tells the widget its container changed size.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the widget is missing or throws.
    pub async fn notify_resize(&self) -> Result<()> {
        self.call("notifyResize").await
    }

    /// Pins the widget container to `width` x `height` pixels and notifies
    /// the widget.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the container is missing.
    pub async fn resize_container(&self, width: u32, height: u32) -> Result<()> {
        let container = encode(&self.container)?;
        let style = encode(&format!(
            "position:absolute;top:0;left:0;width:{width}px;height:{height}px"
        ))?;
        self.page
            .run(&format!(
                "(() => {{ \
                    const el = document.querySelector({container}); \
                    if (!el) throw new Error('container not found: ' + {container}); \
                    el.setAttribute('style', {style}); \
                }})()"
            ))
            .await?;
        self.notify_resize().await
    }

    /// Restores widget state from a configuration object through the model.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the model is missing or rejects the
    /// configuration.
    pub async fn restore(&self, config: &Value) -> Result<()> {
        let config = serde_json::to_string(config)
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))?;
        debug!("widget.restore({})", config);
        self.page
            .run(&format!(
                "(async () => {{ await ({}).restore({config}); }})()",
                self.model
            ))
            .await
    }

    /// The widget's inner HTML with every `style` attribute removed.
    ///
    /// Auto-sized column widths differ slightly between platforms, so inline
    /// styles are stripped before the markup is compared against snapshots.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the widget is missing.
    pub async fn snapshot_html(&self) -> Result<String> {
        let selector = encode(&self.selector)?;
        self.page
            .evaluate(&format!(
                "(() => {{ \
                    const el = document.querySelector({selector}); \
                    if (!el) throw new Error('widget not found: ' + {selector}); \
                    for (const child of el.querySelectorAll('*')) child.removeAttribute('style'); \
                    return el.innerHTML; \
                }})()"
            ))
            .await
    }
}
