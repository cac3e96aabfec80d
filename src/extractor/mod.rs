use regex::Regex;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extensions that qualify a link as a document.
pub const DOCUMENT_EXTENSIONS: [&str; 5] = [".pdf", ".doc", ".docx", ".xls", ".xlsx"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid page url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LinkCategory {
    AllLinks,
    Images,
    Videos,
    Documents,
}

impl fmt::Display for LinkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkCategory::AllLinks => "all-links",
            LinkCategory::Images => "images",
            LinkCategory::Videos => "videos",
            LinkCategory::Documents => "documents",
        };
        f.write_str(name)
    }
}

/// Fetches a page and returns the absolute URLs of the elements matching a
/// category. A simple parse-and-filter pass, not part of the download core.
pub struct LinkExtractor {
    client: reqwest::Client,
}

impl LinkExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }

    /// `progress` receives the percentage of elements processed so far.
    pub async fn extract(
        &self,
        page_url: &str,
        category: LinkCategory,
        progress: impl FnMut(u32),
    ) -> Result<Vec<String>, ExtractError> {
        let base =
            Url::parse(page_url).map_err(|e| ExtractError::InvalidUrl(format!("{page_url}: {e}")))?;
        let response = self
            .client
            .get(base.as_str())
            .send()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExtractError::Fetch(format!(
                "HTTP status {}",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;
        debug!("fetched {} bytes from {}", html.len(), base);
        Ok(extract_from_html(&html, &base, category, progress))
    }
}

/// Scans the markup for the category's elements and resolves relative URLs
/// against the page URL.
pub fn extract_from_html(
    html: &str,
    base: &Url,
    category: LinkCategory,
    mut progress: impl FnMut(u32),
) -> Vec<String> {
    let pattern = match category {
        LinkCategory::AllLinks | LinkCategory::Documents => {
            r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#
        }
        LinkCategory::Images => r#"(?is)<img\s[^>]*?src\s*=\s*["']([^"']+)["']"#,
        LinkCategory::Videos => r#"(?is)<video\s[^>]*?src\s*=\s*["']([^"']+)["']"#,
    };
    let re = Regex::new(pattern).expect("static link pattern");

    let candidates: Vec<&str> = re
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str())
        .collect();
    let total = candidates.len();

    let mut links = Vec::new();
    for (index, raw) in candidates.iter().enumerate() {
        let keep = match category {
            LinkCategory::Documents => {
                let lower = raw.to_ascii_lowercase();
                DOCUMENT_EXTENSIONS.iter().any(|ext| lower.contains(ext))
            }
            _ => true,
        };
        if keep && let Ok(resolved) = base.join(raw) {
            links.push(resolved.to_string());
        }
        progress((((index + 1) * 100) / total) as u32);
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <a href="/docs/report.PDF">report</a>
        <a href="https://other.example.org/page.html">elsewhere</a>
        <a href="notes.txt">notes</a>
        <img src="/img/logo.png" alt="logo">
        <video src="clip.mp4"></video>
        <a href="sheet.xlsx">sheet</a>
        </body></html>
    "#;

    fn base() -> Url {
        Url::parse("http://example.com/pages/index.html").unwrap()
    }

    #[test]
    fn all_links_resolves_relative_urls() {
        let links = extract_from_html(PAGE, &base(), LinkCategory::AllLinks, |_| {});
        assert_eq!(
            links,
            vec![
                "http://example.com/docs/report.PDF",
                "https://other.example.org/page.html",
                "http://example.com/pages/notes.txt",
                "http://example.com/pages/sheet.xlsx",
            ]
        );
    }

    #[test]
    fn documents_filter_matches_extensions_case_insensitively() {
        let links = extract_from_html(PAGE, &base(), LinkCategory::Documents, |_| {});
        assert_eq!(
            links,
            vec![
                "http://example.com/docs/report.PDF",
                "http://example.com/pages/sheet.xlsx",
            ]
        );
    }

    #[test]
    fn images_and_videos_use_src() {
        let images = extract_from_html(PAGE, &base(), LinkCategory::Images, |_| {});
        assert_eq!(images, vec!["http://example.com/img/logo.png"]);
        let videos = extract_from_html(PAGE, &base(), LinkCategory::Videos, |_| {});
        assert_eq!(videos, vec!["http://example.com/pages/clip.mp4"]);
    }

    #[test]
    fn progress_covers_every_element_and_ends_at_100() {
        let mut reports = Vec::new();
        extract_from_html(PAGE, &base(), LinkCategory::AllLinks, |p| reports.push(p));
        assert_eq!(reports.len(), 4);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reports.last().unwrap(), 100);
    }

    #[test]
    fn empty_page_yields_no_links_and_no_progress() {
        let mut reports = Vec::new();
        let links = extract_from_html("<html></html>", &base(), LinkCategory::AllLinks, |p| {
            reports.push(p)
        });
        assert!(links.is_empty());
        assert!(reports.is_empty());
    }
}
