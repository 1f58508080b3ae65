//! Parsing helpers over the generated article HTML: fence stripping,
//! title/digest extraction and image URL discovery.
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;

use crate::model::truncate_digest;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("article has no <h1> title")]
    MissingTitle,
    #[error("article has no text to build a digest from")]
    MissingDigest,
}

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:html)?\s*([\s\S]*?)```").expect("valid fence regex"));
static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("valid css url regex")
});
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid h1 selector"));
static IMAGE_ELEMENTS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img, picture source").expect("valid image selector"));

/// Hosts serving images that already live on the WeChat platform.
const PLATFORM_IMAGE_HOSTS: [&str; 2] = ["mmbiz.qpic.cn", "mmbiz.qlogo.cn"];

/// Return the contents of the first fenced code block (```` ``` ```` or
/// ```` ```html ````), or the whole input when there is none. Trimmed either way.
pub fn strip_code_fence(content: &str) -> String {
    match FENCED_BLOCK.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// Extract `(title, digest)` from article HTML.
///
/// The title is the whitespace-normalised text of the first `<h1>`. The digest
/// is the normalised visible text of the whole document (script and style
/// contents excluded), cut to the digest limit.
pub fn extract_title_digest(html: &str) -> Result<(String, String), ContentError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&H1)
        .next()
        .map(|h1| normalize_whitespace(&h1.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
        .ok_or(ContentError::MissingTitle)?;

    let mut pieces = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let parent_is_code = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .map(|name| name == "script" || name == "style")
            .unwrap_or(false);
        if !parent_is_code {
            pieces.push(&**text);
        }
    }
    let text = normalize_whitespace(&pieces.join(" "));
    if text.is_empty() {
        return Err(ContentError::MissingDigest);
    }

    Ok((title, truncate_digest(&text)))
}

/// Build the cover-image prompt from the title's last `|` segment and the digest.
pub fn cover_prompt(title: &str, digest: &str) -> String {
    let topic = title.rsplit('|').next().unwrap_or(title).trim();
    format!("主题：{}，内容：{}", topic, digest)
}

/// All external image URLs referenced by `<img>` (`src`, `data-src`,
/// `srcset`), `<picture><source srcset>` and CSS `url(...)`, deduplicated in
/// order of first appearance. Relative URLs and images already hosted on the
/// platform are left out.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |url: &str| {
        let url = url.trim();
        if is_external_image(url) && !found.iter().any(|u| u == url) {
            found.push(url.to_string());
        }
    };

    let document = Html::parse_fragment(html);
    for element in document.select(&IMAGE_ELEMENTS) {
        let attrs = element.value();
        if attrs.name() == "img" {
            for name in ["src", "data-src"] {
                if let Some(url) = attrs.attr(name) {
                    push(url);
                }
            }
        }
        if let Some(srcset) = attrs.attr("srcset") {
            for candidate in srcset.split(',') {
                if let Some(url) = candidate.split_whitespace().next() {
                    push(url);
                }
            }
        }
    }
    for cap in CSS_URL.captures_iter(html) {
        push(&cap[1]);
    }
    found
}

fn is_external_image(url: &str) -> bool {
    (url.starts_with("http://") || url.starts_with("https://")) && !is_platform_hosted(url)
}

pub fn is_platform_hosted(url: &str) -> bool {
    let rest = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    PLATFORM_IMAGE_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
