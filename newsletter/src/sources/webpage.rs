use crate::traits::WebpageExtractor;
use crate::types::{Content, NewsletterError, Result, Webpage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Fetches a page over HTTP and pulls the article out of its markup.
pub struct HttpWebpageExtractor {
    client: Client,
}

impl HttpWebpageExtractor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebpageExtractor for HttpWebpageExtractor {
    async fn extract(&self, url: &str) -> Result<Content> {
        debug!("Extracting article from {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NewsletterError::Source(format!(
                "HTTP {} fetching {}",
                status, url
            )));
        }

        let final_url = response.url().to_string();
        let html = response.text().await?;
        Ok(Content::Webpage(parse_article(&html, &final_url)))
    }
}

/// Read the article fields out of an HTML document.
pub fn parse_article(html: &str, fetched_url: &str) -> Webpage {
    let document = Html::parse_document(html);

    let title = meta_content(&document, "meta[property='og:title']").or_else(|| {
        first_text(&document, "title")
    });

    let body = article_body(&document);

    let published_at = meta_content(&document, "meta[property='article:published_time']")
        .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
        .map(|value| value.with_timezone(&Utc));

    let authors: Vec<String> = ["meta[name='author']", "meta[property='article:author']"]
        .iter()
        .filter_map(|selector| Selector::parse(selector).ok())
        .flat_map(|selector| {
            document
                .select(&selector)
                .filter_map(|element| element.value().attr("content"))
                .map(|content| content.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|author| !author.is_empty())
        .fold(Vec::new(), |mut acc, author| {
            if !acc.contains(&author) {
                acc.push(author);
            }
            acc
        });

    let url = meta_content(&document, "meta[property='og:url']")
        .unwrap_or_else(|| fetched_url.to_string());

    Webpage {
        title,
        body,
        published_at,
        url: Some(url),
        authors: if authors.is_empty() { None } else { Some(authors) },
    }
}

fn article_body(document: &Html) -> Option<String> {
    let paragraphs = |selector: &str| -> Vec<String> {
        let Ok(selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        document
            .select(&selector)
            .map(|element| clean_text(&element.text().collect::<Vec<_>>().join(" ")))
            .filter(|text| !text.is_empty())
            .collect()
    };

    let mut found = paragraphs("article p");
    if found.is_empty() {
        found = paragraphs("p");
    }

    if found.is_empty() {
        None
    } else {
        Some(found.join("\n\n"))
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text = clean_text(&element.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
