//! Page fetch tool: loads a URL and returns its title and readable text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::http_client::build_http_client;
use crate::text_utils::{collapse_whitespace, truncate_with_marker};
use crate::tools::traits::{Tool, ToolOutput, ToolSchema};

const DEFAULT_MAX_TEXT_BYTES: usize = 4_000;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Invalid regex"));
static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?</script>").expect("Invalid regex"));
static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b.*?</style>").expect("Invalid regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid regex"));

#[derive(Debug, Deserialize)]
struct PageFetchInput {
    url: String,
}

/// Opens a web page over HTTP and returns what a reader would see.
pub struct PageFetchTool {
    client: Client,
    max_text_bytes: usize,
}

impl Default for PageFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFetchTool {
    pub fn new() -> Self {
        Self {
            client: build_http_client(),
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }

    /// Create with a custom reqwest client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }

    pub fn with_max_text_bytes(mut self, max_text_bytes: usize) -> Self {
        self.max_text_bytes = max_text_bytes;
        self
    }
}

/// Accept bare hosts like `example.com`; reject non-web schemes.
fn normalize_url(raw: &str) -> std::result::Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("url must not be empty".to_string());
    }
    match raw.split_once("://") {
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("http") => Ok(raw.to_string()),
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("https") => Ok(raw.to_string()),
        Some((scheme, _)) => Err(format!("unsupported scheme: {}", scheme)),
        None => Ok(format!("https://{}", raw)),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn extract_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| collapse_whitespace(&decode_entities(m.as_str())))
        .filter(|title| !title.is_empty())
}

fn extract_text(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, " ");
    let without_styles = STYLE_BLOCK.replace_all(&without_scripts, " ");
    let without_tags = TAG.replace_all(&without_styles, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

#[async_trait]
impl Tool for PageFetchTool {
    fn name(&self) -> &str {
        "browser_open"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name(),
            "Open a web page by URL and return its title and visible text. Use it to read pages or search results (for example https://www.bing.com/search?q=...).",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Page URL; https:// is assumed when no scheme is given"
                    }
                },
                "required": ["url"]
            }),
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let params: PageFetchInput = serde_json::from_value(input)?;
        let url = match normalize_url(&params.url) {
            Ok(url) => url,
            Err(message) => return Ok(ToolOutput::error(message)),
        };

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response.text().await.unwrap_or_default();

        tracing::debug!(url = %final_url, status, bytes = html.len(), "Fetched page");

        Ok(ToolOutput::success(json!({
            "status": status,
            "url": final_url,
            "title": extract_title(&html),
            "text": truncate_with_marker(&extract_text(&html), self.max_text_bytes),
        })))
    }
}
