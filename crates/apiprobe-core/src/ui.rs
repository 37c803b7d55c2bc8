//! Browser-driver seam for UI-level checks.
//!
//! The driver (navigation, element lookup, waiting) lives outside the
//! harness. Given a page with a name input and a result element, the harness
//! asks the driver to submit a name and checks that the rendered text names
//! the same top country the API returns.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::Transport;
use crate::validator::top_prediction;

/// Text rendered when the service returns no prediction.
pub const NOT_FOUND: &str = "Not found";

/// External browser-automation driver.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Type `name` into the page, submit, and return the result element text.
    async fn submit_name(&self, name: &str) -> Result<String>;
}

/// Result of one UI check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiCheck {
    pub name: String,
    /// Top country the page should show.
    pub expected: String,
    pub rendered: String,
    pub passed: bool,
}

/// The result line the page renders for `name` given the API body.
pub fn expected_result_text(name: &str, body: &Value) -> String {
    let top = top_prediction(body).unwrap_or_else(|| NOT_FOUND.to_string());
    format!("Top nationality for {name}: {top}")
}

/// Check rendered text against the API's top prediction.
pub fn check_rendered_result(name: &str, body: &Value, rendered: &str) -> UiCheck {
    let expected = top_prediction(body).unwrap_or_else(|| NOT_FOUND.to_string());
    UiCheck {
        name: name.to_string(),
        passed: rendered.contains(&expected),
        expected,
        rendered: rendered.to_string(),
    }
}

/// Fetch the API answer for `name`, drive the page, and compare.
pub async fn run_ui_check(
    driver: &dyn BrowserDriver,
    transport: &dyn Transport,
    name: &str,
) -> Result<UiCheck> {
    let response = transport
        .send(name)
        .await
        .with_context(|| format!("fetch API result for {name:?}"))?;
    let body: Value = serde_json::from_slice(&response.body)
        .with_context(|| format!("parse API body for {name:?}"))?;
    let rendered = driver
        .submit_name(name)
        .await
        .with_context(|| format!("drive page for {name:?}"))?;
    Ok(check_rendered_result(name, &body, &rendered))
}
