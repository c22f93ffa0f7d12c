use async_trait::async_trait;
use html2text::render::TrivialDecorator;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};

use crate::config::ExtractorConfig;
use crate::error::{AppError, Result};

use super::ArticleExtractor;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const TEXT_WIDTH: usize = 1000;

/// Candidate containers for the article body, most specific first.
const CONTAINERS: [&str; 3] = ["article", "main", "body"];

/// Elements that never carry article text.
const BOILERPLATE: &str = "script, style, noscript, iframe, template, nav, header, footer, aside, form";

pub struct ContentExtractor {
    client: Client,
    min_content_chars: usize,
}

impl ContentExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let client = Client::builder()
            .timeout(config.retry().timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            min_content_chars: config.min_content_chars,
        })
    }
}

#[async_trait]
impl ArticleExtractor for ContentExtractor {
    async fn extract(&self, link: &str) -> Result<String> {
        let response = self
            .client
            .get(link)
            .send()
            .await
            .map_err(|e| AppError::extraction(link, e.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::extraction(
                link,
                format!("HTTP {}", status),
                is_transient(status),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::extraction(link, e.to_string(), true))?;

        let text = extract_main_text(&html).ok_or_else(|| {
            AppError::extraction(link, "could not convert page to text", false)
        })?;

        let chars = text.chars().count();
        if chars < self.min_content_chars {
            return Err(AppError::extraction(
                link,
                format!("extracted content too short ({} chars)", chars),
                false,
            ));
        }

        tracing::debug!(link, chars, "extracted article content");
        Ok(text)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Narrow a page to its main body and convert it to plain text.
pub(crate) fn extract_main_text(html: &str) -> Option<String> {
    let mut document = Html::parse_document(html);
    remove_boilerplate(&mut document);
    let fragment = main_content(&document);

    let text = match html2text::from_read_with_decorator(
        fragment.as_bytes(),
        TEXT_WIDTH,
        TrivialDecorator::new(),
    ) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let cleaned: String = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Detach boilerplate elements from the parsed tree.
fn remove_boilerplate(document: &mut Html) {
    let Ok(selector) = Selector::parse(BOILERPLATE) else {
        return;
    };
    let unwanted: Vec<_> = document.select(&selector).map(|el| el.id()).collect();
    for id in unwanted {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// HTML of the first `<article>`, else `<main>`, else `<body>`, else the whole page.
fn main_content(document: &Html) -> String {
    let root = document.root_element();
    CONTAINERS
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|selector| root.select(&selector).next().map(|el| el.html()))
        .unwrap_or_else(|| document.html())
}
