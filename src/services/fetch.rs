// src/services/fetch.rs

//! HTTP fetchers backing page sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client, StatusCode};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// Request method of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single document request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// urlencoded body fields, POST only
    pub form: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            form: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form,
        }
    }
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// A fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Location after redirects
    pub url: String,
    pub body: String,
    /// Requested URL, every hop, and the final location
    pub redirect_chain: Vec<String>,
}

impl FetchResponse {
    pub fn redirected(&self) -> bool {
        self.redirect_chain.len() > 1
    }
}

/// Append the final location unless it already ends the chain.
fn close_chain(mut chain: Vec<String>, final_url: &str) -> Vec<String> {
    if chain.last().map(String::as_str) != Some(final_url) {
        chain.push(final_url.to_string());
    }
    chain
}

/// Source of HTML documents.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        (**self).fetch(request).await
    }
}

/// Fetcher over a real HTTP client with a cookie store.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Create a configured asynchronous HTTP client.
    ///
    /// Redirects are followed by [`Fetcher::fetch`] itself so every hop
    /// can be reported.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut current = request.clone();
        let mut chain = vec![normalize_key(&request.url)];

        for _ in 0..=MAX_REDIRECTS {
            let builder = match current.method {
                Method::Get => self.client.get(&current.url),
                Method::Post => self.client.post(&current.url).form(&current.form),
            };
            let response = builder.send().await?;

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok());
            if let (true, Some(location)) = (status.is_redirection(), location) {
                let next = response.url().join(location)?.to_string();
                log::debug!("{} redirected ({}) to {}", current.url, status, next);
                chain.push(next.clone());
                current = match status {
                    StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => FetchRequest {
                        url: next,
                        ..current
                    },
                    _ => FetchRequest::get(next),
                };
                continue;
            }

            let response = response.error_for_status()?;
            let url = response.url().to_string();
            let body = response.text().await?;
            let redirect_chain = close_chain(chain, &url);
            return Ok(FetchResponse {
                url,
                body,
                redirect_chain,
            });
        }
        Err(AppError::navigation(&request.url, "too many redirects"))
    }
}

fn normalize_key(url: &str) -> String {
    Url::parse(url)
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .unwrap_or_else(|_| url.to_string())
}

#[derive(Debug, Default)]
struct MemorySite {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    requests: Vec<FetchRequest>,
}

/// In-memory site keyed by URL, for offline replay and tests.
///
/// Unknown URLs fail like a 404. Every request is recorded.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    site: Mutex<MemorySite>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style page registration.
    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.set_page(url, html);
        self
    }

    /// Builder-style redirect registration.
    pub fn with_redirect(self, from: &str, to: &str) -> Self {
        if let Ok(mut site) = self.site.lock() {
            site.redirects.insert(normalize_key(from), normalize_key(to));
        }
        self
    }

    /// Register or replace a page.
    pub fn set_page(&self, url: &str, html: impl Into<String>) {
        if let Ok(mut site) = self.site.lock() {
            site.pages.insert(normalize_key(url), html.into());
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.site
            .lock()
            .map(|site| site.requests.clone())
            .unwrap_or_default()
    }

    /// Number of requests made for `url`.
    pub fn hits(&self, url: &str) -> usize {
        let key = normalize_key(url);
        self.requests()
            .iter()
            .filter(|r| normalize_key(&r.url) == key)
            .count()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut site = self
            .site
            .lock()
            .map_err(|_| AppError::navigation(&request.url, "memory site poisoned"))?;
        site.requests.push(request.clone());

        let mut key = normalize_key(&request.url);
        let mut chain = vec![key.clone()];
        while let Some(next) = site.redirects.get(&key) {
            key = next.clone();
            chain.push(key.clone());
            if chain.len() > MAX_REDIRECTS + 1 {
                return Err(AppError::navigation(&request.url, "too many redirects"));
            }
        }

        site.pages
            .get(&key)
            .map(|body| FetchResponse {
                url: key.clone(),
                body: body.clone(),
                redirect_chain: close_chain(chain, &key),
            })
            .ok_or_else(|| AppError::navigation(&request.url, "404 Not Found"))
    }
}
