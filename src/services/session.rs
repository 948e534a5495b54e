// src/services/session.rs

//! Static-HTML page session over a fetcher.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Target;
use crate::services::document::{self, Activation, ElementId, FieldState};
use crate::services::fetch::{FetchRequest, Fetcher, Method};
use crate::services::page::{Page, WaitCondition};

/// One loaded document with the field values typed into it.
#[derive(Debug, Clone, Default)]
struct Loaded {
    url: String,
    html: String,
    fields: FieldState,
    /// Only documents obtained by GET may be re-fetched while waiting
    refreshable: bool,
    redirect_chain: Vec<String>,
}

/// A [`Page`] that fetches documents and interprets clicks statically.
///
/// Links are followed, submit controls send their form, and checkboxes
/// toggle; anything else is a no-op. The previous document is kept one
/// level deep for [`Page::go_back`].
pub struct HttpSession<F: Fetcher> {
    fetcher: F,
    poll_interval: Duration,
    current: Loaded,
    previous: Option<Loaded>,
}

impl<F: Fetcher> HttpSession<F> {
    pub fn new(fetcher: F, poll_interval: Duration) -> Self {
        Self {
            fetcher,
            poll_interval,
            current: Loaded::default(),
            previous: None,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    async fn load(&mut self, request: FetchRequest, timeout_ms: u64) -> Result<()> {
        let url = request.url.clone();
        log::debug!("Loading {} ({:?})", url, request.method);
        let response = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.fetcher.fetch(&request),
        )
        .await
        .map_err(|_| AppError::timeout(format!("navigation to {url}"), timeout_ms))?
        .map_err(|e| match e {
            AppError::Navigation { .. } => e,
            other => AppError::navigation(&url, other),
        })?;

        let loaded = Loaded {
            url: response.url,
            html: response.body,
            fields: FieldState::default(),
            refreshable: request.method == Method::Get,
            redirect_chain: response.redirect_chain,
        };
        self.previous = Some(std::mem::replace(&mut self.current, loaded));
        Ok(())
    }

    /// Re-fetch the current location in place, keeping history untouched.
    ///
    /// A postback result is left alone: a GET of its URL would return a
    /// different document.
    async fn refresh(&mut self, timeout: Duration) -> Result<()> {
        let request = FetchRequest::get(self.current.url.clone());
        let response = tokio::time::timeout(timeout, self.fetcher.fetch(&request))
            .await
            .map_err(|_| AppError::timeout("refresh", timeout.as_millis() as u64))??;
        if response.body != self.current.html {
            self.current.fields = FieldState::default();
        }
        self.current.url = response.url;
        self.current.html = response.body;
        Ok(())
    }

    /// Poll until `check` yields a value or the budget is spent.
    async fn poll<T: Send>(
        &mut self,
        waiting_for: &str,
        timeout_ms: u64,
        pollable: bool,
        check: impl Fn(&str, &str) -> Result<Option<T>> + Send,
    ) -> Result<T> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(found) = check(&self.current.url, &self.current.html)? {
                return Ok(found);
            }
            let now = Instant::now();
            if !pollable || !self.current.refreshable || now >= deadline {
                return Err(AppError::timeout(waiting_for, timeout_ms));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }
            if let Err(e) = self.refresh(remaining).await {
                log::debug!("Refresh while waiting for {} failed: {}", waiting_for, e);
            }
        }
    }

    async fn resolve(&mut self, target: &Target, timeout_ms: u64) -> Result<ElementId> {
        let waiting_for = target.to_string();
        self.poll(&waiting_for, timeout_ms, true, |_, html| document::locate(html, target))
            .await
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.current.url).map_err(AppError::from)
    }

    fn set_checked(&mut self, control: ElementId, value: bool, group: Vec<ElementId>) {
        if value {
            for other in group {
                self.current.fields.checked.insert(other, false);
            }
        }
        self.current.fields.checked.insert(control, value);
    }
}

#[async_trait]
impl<F: Fetcher> Page for HttpSession<F> {
    async fn goto(&mut self, url: &str, timeout_ms: u64) -> Result<()> {
        self.load(FetchRequest::get(url), timeout_ms).await
    }

    fn current_url(&self) -> String {
        self.current.url.clone()
    }

    fn content(&self) -> String {
        self.current.html.clone()
    }

    fn redirect_chain(&self) -> Vec<String> {
        if self.current.redirect_chain.is_empty() {
            return vec![self.current.url.clone()];
        }
        self.current.redirect_chain.clone()
    }

    async fn click(&mut self, target: &Target, timeout_ms: u64) -> Result<()> {
        let id = self.resolve(target, timeout_ms).await?;
        let base = self.base_url()?;
        let activation = document::activation(&self.current.html, id, &base, &self.current.fields)?;

        match activation {
            Activation::Follow(url) => self.load(FetchRequest::get(url), timeout_ms).await,
            Activation::Submit(form) => {
                let request = match form.method {
                    Method::Get => FetchRequest::get(form.url),
                    Method::Post => FetchRequest::post(form.url, form.fields),
                };
                self.load(request, timeout_ms).await
            }
            Activation::Toggle(_) => {
                if let Some((control, checked, group)) =
                    document::toggle_control(&self.current.html, id, &self.current.fields)
                {
                    let value = document::is_radio(&self.current.html, control) || !checked;
                    self.set_checked(control, value, group);
                }
                Ok(())
            }
            Activation::Inert => {
                log::debug!("Click on {} has no static effect", target);
                Ok(())
            }
        }
    }

    async fn check(&mut self, target: &Target, timeout_ms: u64) -> Result<()> {
        let id = self.resolve(target, timeout_ms).await?;
        let (control, _, group) =
            document::toggle_control(&self.current.html, id, &self.current.fields)
                .ok_or_else(|| AppError::validation(format!("{target} is not a checkbox or radio")))?;
        self.set_checked(control, true, group);
        Ok(())
    }

    async fn fill(&mut self, target: &Target, value: &str, timeout_ms: u64) -> Result<()> {
        let id = self.resolve(target, timeout_ms).await?;
        if !document::fillable(&self.current.html, id) {
            return Err(AppError::validation(format!("{target} is not an input field")));
        }
        self.current.fields.values.insert(id, value.to_string());
        Ok(())
    }

    async fn wait_for(&mut self, condition: &WaitCondition, timeout_ms: u64) -> Result<()> {
        let waiting_for = condition.to_string();
        let pollable = condition.can_change_by_polling();
        self.poll(&waiting_for, timeout_ms, pollable, |url, html| {
            Ok(condition.is_met(url, html)?.then_some(()))
        })
        .await
    }

    fn count(&self, selector: &str) -> Result<usize> {
        document::count(&self.current.html, selector)
    }

    fn text_of(&self, target: &Target) -> Result<Option<String>> {
        Ok(document::locate(&self.current.html, target)?
            .and_then(|id| document::text_at(&self.current.html, id)))
    }

    fn attr_of(&self, target: &Target, name: &str) -> Result<Option<String>> {
        Ok(document::locate(&self.current.html, target)?
            .and_then(|id| document::attr_at(&self.current.html, id, name)))
    }

    async fn go_back(&mut self, _timeout_ms: u64) -> Result<()> {
        match self.previous.take() {
            Some(previous) => {
                self.current = previous;
                Ok(())
            }
            None => Err(AppError::navigation(
                self.current.url.clone(),
                "no previous page to return to",
            )),
        }
    }

    fn body_text(&self) -> String {
        document::body_text(&self.current.html)
    }
}
