//! Page-level browser primitives.
//!
//! `Page` wraps a chromiumoxide page and exposes the handful of actions the
//! session driver needs: navigation, script evaluation, DOM waits (CSS,
//! visibility, XPath, arbitrary predicate), clicks, key presses and text
//! insertion into whatever element currently has focus.
//!
//! Selectors and scripts handed to the page are embedded into probe scripts
//! through `serde_json` string encoding, never by string interpolation.

use crate::error::{BrowserError, Result};
use crate::wait::{LoadState, WaitConfig, wait_for_result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page as ChromePage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// The element that held keyboard focus at a given moment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusTarget {
    /// Lower-case tag name, e.g. `textarea`.
    pub tag: String,
    #[serde(default)]
    pub class_name: String,
    /// True if nothing but the document body is focused.
    pub is_body: bool,
}

/// Key data needed to synthesize a `keyDown`/`keyUp` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyDefinition {
    key: String,
    code: String,
    text: Option<String>,
    virtual_key_code: i64,
}

impl KeyDefinition {
    fn lookup(key: &str) -> Option<Self> {
        let named = |key: &str, text: Option<&str>, vk: i64| KeyDefinition {
            key: key.to_string(),
            code: key.to_string(),
            text: text.map(str::to_string),
            virtual_key_code: vk,
        };

        match key {
            "Enter" => return Some(named("Enter", Some("\r"), 13)),
            "Escape" => return Some(named("Escape", None, 27)),
            "Tab" => return Some(named("Tab", None, 9)),
            "Backspace" => return Some(named("Backspace", None, 8)),
            _ => {}
        }

        let mut chars = key.chars();
        let c = chars.next()?;
        if chars.next().is_some() || !c.is_ascii_alphanumeric() {
            return None;
        }

        let upper = c.to_ascii_uppercase();
        let code = if c.is_ascii_digit() {
            format!("Digit{c}")
        } else {
            format!("Key{upper}")
        };

        Some(KeyDefinition {
            key: c.to_string(),
            code,
            text: Some(c.to_string()),
            virtual_key_code: i64::from(upper as u8),
        })
    }
}

fn encode(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))
}

fn visible_probe(selector: &str) -> Result<String> {
    let selector = encode(selector)?;
    Ok(format!(
        "(() => {{ \
            const el = document.querySelector({selector}); \
            if (!el) return false; \
            const style = window.getComputedStyle(el); \
            const rect = el.getBoundingClientRect(); \
            return style.visibility !== 'hidden' && style.display !== 'none' \
                && rect.width > 0 && rect.height > 0; \
        }})()"
    ))
}

fn xpath_probe(xpath: &str) -> Result<String> {
    let xpath = encode(xpath)?;
    Ok(format!(
        "!!document.evaluate({xpath}, document, null, \
            XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
    ))
}

const FOCUS_PROBE: &str = "(() => { \
    const el = document.activeElement; \
    return { \
        tag: el ? el.tagName.toLowerCase() : 'body', \
        className: el && typeof el.className === 'string' ? el.className : '', \
        isBody: !el || el === document.body \
    }; \
})()";

/// A browser tab bound to one test.
#[derive(Debug)]
pub struct Page {
    inner: ChromePage,
}

impl Page {
    pub(crate) fn new(page: ChromePage) -> Self {
        Self { inner: page }
    }

    /// Navigates to `url` and waits until `load_state` is reached.
    ///
    /// # Errors
    ///
    /// Returns `NavigationFailed` if the page fails to load, or `WaitTimeout`.
    pub async fn navigate(&self, url: &str, load_state: LoadState) -> Result<()> {
        debug!("navigating to {}", url);
        self.inner
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        self.wait_for_load(load_state, WaitConfig::default()).await
    }

    /// Waits until `document.readyState` satisfies `load_state`.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if the state is not reached in time.
    pub async fn wait_for_load(&self, load_state: LoadState, config: WaitConfig) -> Result<()> {
        wait_for_result(
            || async move {
                let state: String = self.evaluate("document.readyState").await?;
                Ok(load_state.is_reached(&state))
            },
            config,
            "document ready",
        )
        .await
    }

    /// Evaluates `script`, awaiting a returned promise, and deserializes the result.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the script throws or the value does
    /// not deserialize into `T`.
    pub async fn evaluate<T>(&self, script: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::ScriptExecutionFailed)?;

        self.inner
            .evaluate_expression(params)
            .await
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))
    }

    /// Evaluates `script` for its side effects only.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the script throws.
    pub async fn run(&self, script: &str) -> Result<()> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .build()
            .map_err(BrowserError::ScriptExecutionFailed)?;

        self.inner
            .evaluate_expression(params)
            .await
            .map(drop)
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))
    }

    /// Waits until `expression` evaluates truthy.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` naming `description`.
    pub async fn wait_for_function(
        &self,
        expression: &str,
        config: WaitConfig,
        description: &str,
    ) -> Result<()> {
        let script = format!("!!({expression})");
        self.poll(&script, config, description).await
    }

    /// Waits for a CSS selector to match an element.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if nothing matches in time.
    pub async fn wait_for_selector(&self, selector: &str, config: WaitConfig) -> Result<()> {
        let script = format!("!!document.querySelector({})", encode(selector)?);
        self.poll(&script, config, &format!("selector '{selector}'"))
            .await
    }

    /// Waits for a CSS selector to match a rendered, non-hidden element.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if no visible element matches in time.
    pub async fn wait_for_visible(&self, selector: &str, config: WaitConfig) -> Result<()> {
        let script = visible_probe(selector)?;
        self.poll(&script, config, &format!("visible '{selector}'"))
            .await
    }

    /// Waits for an XPath expression to match a node.
    ///
    /// # Errors
    ///
    /// Returns `WaitTimeout` if nothing matches in time.
    pub async fn wait_for_xpath(&self, xpath: &str, config: WaitConfig) -> Result<()> {
        let script = xpath_probe(xpath)?;
        self.poll(&script, config, &format!("xpath '{xpath}'")).await
    }

    /// JS expression counting the elements matching `selector`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the selector cannot be encoded.
    pub fn count_selector_expression(selector: &str) -> Result<String> {
        Ok(format!(
            "document.querySelectorAll({}).length",
            encode(selector)?
        ))
    }

    /// JS expression counting the nodes matching `xpath`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the expression cannot be encoded.
    pub fn count_xpath_expression(xpath: &str) -> Result<String> {
        Ok(format!(
            "document.evaluate({}, document, null, \
                XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
            encode(xpath)?
        ))
    }

    /// Number of elements currently matching `selector`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the probe fails.
    pub async fn count_selector(&self, selector: &str) -> Result<u64> {
        self.evaluate(&Self::count_selector_expression(selector)?)
            .await
    }

    /// Number of nodes currently matching `xpath`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the probe fails.
    pub async fn count_xpath(&self, xpath: &str) -> Result<u64> {
        self.evaluate(&Self::count_xpath_expression(xpath)?).await
    }

    async fn poll(&self, script: &str, config: WaitConfig, description: &str) -> Result<()> {
        wait_for_result(
            || async move { self.evaluate::<bool>(script).await },
            config,
            description,
        )
        .await
    }

    /// Clicks the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// Returns `InputFailed` if no element matches or the click is rejected.
    pub async fn click(&self, selector: &str) -> Result<()> {
        let input_failed = |e: chromiumoxide::error::CdpError| BrowserError::InputFailed {
            target: selector.to_string(),
            reason: e.to_string(),
        };

        let element = self.inner.find_element(selector).await.map_err(input_failed)?;
        element.click().await.map_err(input_failed)?;
        Ok(())
    }

    /// Presses and releases `key` on whatever element has focus.
    ///
    /// Accepts single ASCII letters or digits and `Enter`, `Escape`, `Tab`,
    /// `Backspace`.
    ///
    /// # Errors
    ///
    /// Returns `InputFailed` for unknown keys or rejected events.
    pub async fn press_key(&self, key: &str) -> Result<()> {
        let input_failed = |reason: String| BrowserError::InputFailed {
            target: key.to_string(),
            reason,
        };

        let definition = KeyDefinition::lookup(key)
            .ok_or_else(|| input_failed("unsupported key".to_string()))?;

        for event_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(event_type.clone())
                .key(definition.key.clone())
                .code(definition.code.clone())
                .windows_virtual_key_code(definition.virtual_key_code)
                .native_virtual_key_code(definition.virtual_key_code);

            if event_type == DispatchKeyEventType::KeyDown {
                if let Some(text) = &definition.text {
                    builder = builder.text(text.clone());
                }
            }

            let params = builder.build().map_err(input_failed)?;
            self.inner
                .execute(params)
                .await
                .map_err(|e| input_failed(e.to_string()))?;
        }

        Ok(())
    }

    /// Types `text` into the focused element, line by line, pressing Enter
    /// between lines.
    ///
    /// # Errors
    ///
    /// Returns `InputFailed` if the browser rejects an input event.
    pub async fn type_text(&self, text: &str) -> Result<()> {
        for (index, line) in text.split('\n').enumerate() {
            if index > 0 {
                self.press_key("Enter").await?;
            }
            if line.is_empty() {
                continue;
            }
            self.inner
                .execute(InsertTextParams::new(line))
                .await
                .map_err(|e| BrowserError::InputFailed {
                    target: "active element".to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Describes the element that currently has keyboard focus.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecutionFailed` if the probe fails.
    pub async fn active_element(&self) -> Result<FocusTarget> {
        self.evaluate(FOCUS_PROBE).await
    }

    /// Returns the page title.
    ///
    /// # Errors
    ///
    /// Returns an error if script execution fails.
    pub async fn title(&self) -> Result<String> {
        self.evaluate("document.title").await
    }

    /// Returns the current page URL.
    ///
    /// # Errors
    ///
    /// Returns an error if script execution fails.
    pub async fn url(&self) -> Result<String> {
        self.evaluate("window.location.href").await
    }

    /// Takes a PNG screenshot, useful when a readiness wait fails in CI.
    ///
    /// # Errors
    ///
    /// Returns an error if screenshot capture fails.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.inner
            .screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| BrowserError::ScriptExecutionFailed(e.to_string()))
    }

    /// Closes the tab.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser rejects the close.
    pub async fn close(self) -> Result<()> {
        self.inner.close().await.map_err(BrowserError::ChromiumOxide)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_keys_map_to_key_codes() {
        let r = KeyDefinition::lookup("R").unwrap();
        assert_eq!(r.code, "KeyR");
        assert_eq!(r.text.as_deref(), Some("R"));
        assert_eq!(r.virtual_key_code, 82);

        let lower = KeyDefinition::lookup("r").unwrap();
        assert_eq!(lower.code, "KeyR");
        assert_eq!(lower.text.as_deref(), Some("r"));

        let digit = KeyDefinition::lookup("7").unwrap();
        assert_eq!(digit.code, "Digit7");
    }

    #[test]
    fn named_and_unknown_keys() {
        assert_eq!(KeyDefinition::lookup("Enter").unwrap().virtual_key_code, 13);
        assert!(KeyDefinition::lookup("Escape").unwrap().text.is_none());
        assert!(KeyDefinition::lookup("F13").is_none());
        assert!(KeyDefinition::lookup("").is_none());
        assert!(KeyDefinition::lookup("%").is_none());
    }

    #[test]
    fn probes_embed_selectors_as_json_strings() {
        let probe = visible_probe(r#"div[data-x="a'b"]"#).unwrap();
        assert!(probe.contains(r#"document.querySelector("div[data-x=\"a'b\"]")"#));

        let probe = xpath_probe(r#"//pre[contains(text(),"'Passed'")]"#).unwrap();
        assert!(probe.starts_with(r#"!!document.evaluate("//pre[contains(text(),\"'Passed'\")]""#));
    }

    #[test]
    fn count_expressions_can_be_compared_against_a_baseline() {
        let css = Page::count_selector_expression(".jp-CodeCell").unwrap();
        assert_eq!(css, r#"document.querySelectorAll(".jp-CodeCell").length"#);

        let xpath = Page::count_xpath_expression("//pre").unwrap();
        assert!(xpath.starts_with(r#"document.evaluate("//pre""#));
        assert!(xpath.ends_with(".snapshotLength"));
    }

    #[test]
    fn focus_target_deserializes_from_probe_shape() {
        let target: FocusTarget = serde_json::from_value(serde_json::json!({
            "tag": "textarea",
            "className": "cm-content",
            "isBody": false
        }))
        .unwrap();
        assert_eq!(target.tag, "textarea");
        assert!(!target.is_body);
    }
}
