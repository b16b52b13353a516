//! Generic page scrape
//!
//! Used when no site adapter is registered for a host: fetch the page and
//! keep every anchor whose target looks like a data file.

use crate::error::{IngestError, Result};
use crate::fetch::USER_AGENT;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A download link and its display title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub title: String,
    pub url: Url,
}

#[async_trait]
pub trait LinkScraper: Send + Sync {
    /// Data links found on `page`
    async fn links(&self, page: &Url, extensions: &[String]) -> Result<Vec<Link>>;
}

pub struct HtmlLinkScraper {
    client: Client,
}

impl HtmlLinkScraper {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkScraper for HtmlLinkScraper {
    async fn links(&self, page: &Url, extensions: &[String]) -> Result<Vec<Link>> {
        let response = self.client.get(page.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Fetch {
                url: page.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let html = response.text().await?;
        let links = extract_links(page, &html, extensions)?;
        debug!(page = %page, links = links.len(), "Scraped page");
        Ok(links)
    }
}

/// Anchors in `html` pointing at files with one of `extensions`, resolved
/// against `base`, in document order and without duplicates
pub fn extract_links(base: &Url, html: &str, extensions: &[String]) -> Result<Vec<Link>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]")
        .map_err(|e| IngestError::config(format!("Invalid link selector: {}", e)))?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            debug!(href = href, "Skipping unresolvable link");
            continue;
        };
        if !is_data_link(&url, extensions) || !seen.insert(url.clone()) {
            continue;
        }

        let text = element.text().collect::<String>();
        let title = match text.split_whitespace().collect::<Vec<_>>().join(" ") {
            t if t.is_empty() => url.to_string(),
            t => t,
        };
        links.push(Link { title, url });
    }

    Ok(links)
}

fn is_data_link(url: &Url, extensions: &[String]) -> bool {
    let path = url.path().to_lowercase();
    extensions.iter().any(|ext| {
        path.ends_with(&format!(".{}", ext)) || path.contains(&format!("/{}/", ext))
    })
}
