// src/services/paginator.rs

//! Pagination over direct item URLs or a results listing.
//!
//! Direct-items mode visits each configured URL in order. Listing mode
//! walks the results rows one at a time: open the row's detail view,
//! extract, return to the listing, advance. A row that cannot be opened
//! or extracted is recorded as skipped and never retried, so a broken
//! row can not stall the loop. When nothing at all was extracted, a
//! page-level money match is used as a degraded last resort.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::{AppError, Result};
use crate::models::{
    DegradedSample, EventKind, ItemOutcome, PaidStatus, PortalProfile, PropertySnapshot,
    SourceOutcome, Target,
};
use crate::services::document;
use crate::services::page::{Page, WaitCondition};
use crate::services::parser::{
    derive_address, derive_due_date, derive_total_due, extract_identity, parse_money_with,
    zero_money,
};
use crate::services::tables::extract_tables;
use crate::utils::{extract_account_number, is_workable_href, resolve};

/// Row/link selector pairs tried after the configured pair, in order.
pub const FALLBACK_LOCATORS: &[(&str, &str)] = &[
    ("table tbody tr", "a[href]"),
    ("table tr:has(a)", "a"),
    ("tr", "a[href]"),
    ("li", "a[href]"),
];

/// Receives progress from the controller.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Publish an event for the current run.
    fn emit(&self, kind: EventKind);

    /// Persist an HTML capture, returning its location when one was written.
    async fn capture(&self, label: &str, html: &str) -> Option<String>;
}

/// Effective row and link selectors of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locators {
    pub row: String,
    pub link: String,
}

/// Drives one source's items and accumulates their outcomes.
pub struct PaginationController<'a> {
    profile: &'a PortalProfile,
    outcome: SourceOutcome,
    snapshots: Vec<PropertySnapshot>,
}

impl<'a> PaginationController<'a> {
    pub fn new(profile: &'a PortalProfile, source: impl Into<String>) -> Self {
        Self {
            profile,
            outcome: SourceOutcome::new(source),
            snapshots: Vec::new(),
        }
    }

    /// Accumulated outcome and successful snapshots, also after a failure.
    pub fn into_parts(self) -> (SourceOutcome, Vec<PropertySnapshot>) {
        (self.outcome, self.snapshots)
    }

    /// Process every item of the source.
    ///
    /// Errors are whole-source failures: configuration problems, a lost
    /// listing, or a degraded fallback that found nothing.
    pub async fn run(&mut self, page: &mut dyn Page, sink: &dyn ProgressSink) -> Result<()> {
        let profile = self.profile;
        match profile.direct_items() {
            Some(urls) => self.run_direct(urls, page, sink).await?,
            None => self.run_listing(page, sink).await?,
        }

        if self.snapshots.is_empty() {
            self.degraded_fallback(page, sink).await?;
        }
        Ok(())
    }

    fn cap_reached(&self) -> bool {
        self.profile
            .item_cap()
            .is_some_and(|cap| self.outcome.processed >= cap)
    }

    fn wait_ms(&self) -> u64 {
        self.profile.detail_wait_ms
    }

    async fn run_direct(
        &mut self,
        urls: &[String],
        page: &mut dyn Page,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        for (item_index, url) in urls.iter().enumerate() {
            if self.cap_reached() {
                log::info!("Item cap reached after {} item(s)", self.outcome.processed);
                break;
            }
            sink.emit(EventKind::ItemStarted {
                reference: url.clone(),
                item_index,
            });

            match self.visit_direct(url, item_index, page, sink).await {
                Ok(snapshot) => self.record_success(snapshot, item_index, page, sink).await,
                Err(e) if e.is_config() => return Err(e),
                Err(e) => self.record_skip(url, url, &e, item_index, sink),
            }
        }
        Ok(())
    }

    async fn visit_direct(
        &self,
        url: &str,
        item_index: usize,
        page: &mut dyn Page,
        sink: &dyn ProgressSink,
    ) -> Result<PropertySnapshot> {
        page.goto(url, self.wait_ms()).await?;
        let redirect_chain = page.redirect_chain();
        sink.emit(EventKind::UrlRedirectObserved {
            source_url: url.to_string(),
            final_url: page.current_url(),
            account_number: extract_account_number(url),
            redirected: redirect_chain.len() > 1,
            redirect_chain,
            index: item_index,
        });
        page.wait_for(
            &WaitCondition::Selector(self.profile.detail_table_selector.clone()),
            self.wait_ms(),
        )
        .await?;
        self.extract_item(url, None, page)
    }

    /// First locator pair whose first row carries a link.
    pub fn resolve_locators(&self, page: &dyn Page) -> Result<Option<Locators>> {
        let configured = (
            self.profile.results_row_selector.as_str(),
            self.profile.row_first_link_selector.as_str(),
        );
        for (position, (row, link)) in std::iter::once(configured)
            .chain(FALLBACK_LOCATORS.iter().copied())
            .enumerate()
        {
            let usable = match row_has_link(page, row, link) {
                Ok(usable) => usable,
                // Only the configured pair can be malformed
                Err(e) if position == 0 => return Err(e),
                Err(_) => false,
            };
            if usable {
                return Ok(Some(Locators {
                    row: row.to_string(),
                    link: link.to_string(),
                }));
            }
        }
        Ok(None)
    }

    async fn run_listing(&mut self, page: &mut dyn Page, sink: &dyn ProgressSink) -> Result<()> {
        let Some(locators) = self.resolve_locators(page)? else {
            log::warn!(
                "No results rows with links found on {} (configured '{}' / '{}')",
                page.current_url(),
                self.profile.results_row_selector,
                self.profile.row_first_link_selector
            );
            return Ok(());
        };

        if locators.row != self.profile.results_row_selector
            || locators.link != self.profile.row_first_link_selector
        {
            log::info!(
                "Results locator resolved to '{}' / '{}'",
                locators.row,
                locators.link
            );
            sink.emit(EventKind::ResultsLocatorResolved {
                configured_row_selector: self.profile.results_row_selector.clone(),
                configured_link_selector: self.profile.row_first_link_selector.clone(),
                row_selector: locators.row.clone(),
                link_selector: locators.link.clone(),
            });
        }

        let mut index = 0;
        loop {
            if self.cap_reached() {
                log::info!("Item cap reached after {} item(s)", self.outcome.processed);
                break;
            }
            // The listing may have been re-rendered, so rows are counted fresh
            let rows = page.count(&locators.row)?;
            if index >= rows {
                break;
            }

            let link = Target::Within {
                container: locators.row.clone(),
                index,
                selector: locators.link.clone(),
            };
            let Some(text) = page.text_of(&link)? else {
                index += 1;
                continue;
            };
            let label = if text.is_empty() {
                format!("Row {}", index + 1)
            } else {
                text
            };
            let listing_url = page.current_url();
            let listing_html = page.content();
            let href = page.attr_of(&link, "href")?;
            let reference = href
                .as_deref()
                .filter(|h| is_workable_href(h))
                .and_then(|h| resolve(&listing_url, h.trim()))
                .unwrap_or_else(|| format!("{listing_url}#row-{}", index + 1));

            sink.emit(EventKind::ItemStarted {
                reference: reference.clone(),
                item_index: index,
            });

            let opened = self
                .open_detail(&link, href.as_deref(), &listing_url, page)
                .await;
            let left_listing = match opened {
                Ok(()) => {
                    let detail_url = page.current_url();
                    match self.extract_item(&detail_url, Some(&label), page) {
                        Ok(snapshot) => self.record_success(snapshot, index, page, sink).await,
                        Err(e) if e.is_config() => return Err(e),
                        Err(e) => self.record_skip(&reference, &label, &e, index, sink),
                    }
                    // An inline detail panel leaves the listing in place
                    page.current_url() != listing_url || page.content() != listing_html
                }
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    self.record_skip(&reference, &label, &e, index, sink);
                    page.current_url() != listing_url || page.count(&locators.row)? == 0
                }
            };

            if left_listing {
                self.return_to_listing(&listing_url, &locators, page).await?;
            }
            index += 1;
        }
        Ok(())
    }

    /// Texts of back controls that are not already on the listing.
    fn back_conditions(&self, page: &dyn Page) -> Result<Vec<WaitCondition>> {
        let mut conditions = Vec::new();
        if let Some(selector) = &self.profile.back_control_selector {
            if page.count(selector)? == 0 {
                conditions.push(WaitCondition::Selector(selector.clone()));
            }
        }
        for text in &self.profile.back_control_texts {
            if page.text_of(&Target::Text(text.clone()))?.is_none() {
                conditions.push(WaitCondition::Text(text.clone()));
            }
        }
        Ok(conditions)
    }

    /// Two-phase transition into a row's detail view.
    async fn open_detail(
        &self,
        link: &Target,
        href: Option<&str>,
        listing_url: &str,
        page: &mut dyn Page,
    ) -> Result<()> {
        let mut arrived = vec![WaitCondition::UrlChangedFrom(listing_url.to_string())];
        arrived.extend(self.back_conditions(page)?);
        let arrived = WaitCondition::AnyOf(arrived);

        let first = match page.click(link, self.wait_ms()).await {
            Ok(()) => page.wait_for(&arrived, self.wait_ms()).await,
            Err(e) => Err(e),
        };
        let first_error = match first {
            Ok(()) => return Ok(()),
            Err(e) if e.is_config() => return Err(e),
            Err(e) => e,
        };
        log::debug!("Detail view did not open by click: {}", first_error);

        if let Some(target) = href
            .filter(|h| is_workable_href(h))
            .and_then(|h| resolve(listing_url, h.trim()))
        {
            match page.goto(&target, self.wait_ms()).await {
                Ok(()) => return Ok(()),
                Err(e) => log::debug!("Following {} directly failed: {}", target, e),
            }
        }

        if self.profile.has_specific_table_selector() {
            let detail = WaitCondition::Selector(self.profile.detail_table_selector.clone());
            return page.wait_for(&detail, self.wait_ms()).await;
        }
        Err(first_error)
    }

    /// Named transition back to the results listing.
    async fn return_to_listing(
        &self,
        listing_url: &str,
        locators: &Locators,
        page: &mut dyn Page,
    ) -> Result<()> {
        let detail_url = page.current_url();
        if !self.click_back_control(page).await? {
            page.go_back(self.wait_ms()).await.map_err(|e| {
                AppError::navigation(listing_url, format!("could not return to results: {e}"))
            })?;
        }
        log::debug!("Returned from {} to {}", detail_url, page.current_url());

        let selector = self
            .profile
            .results_container_selector
            .clone()
            .unwrap_or_else(|| locators.row.clone());
        page.wait_for(&WaitCondition::Selector(selector), self.wait_ms())
            .await
            .map_err(|e| {
                AppError::navigation(listing_url, format!("results listing did not reappear: {e}"))
            })
    }

    /// Click a "back to results" control; true if it moved the page.
    async fn click_back_control(&self, page: &mut dyn Page) -> Result<bool> {
        let mut targets = Vec::new();
        if let Some(selector) = &self.profile.back_control_selector {
            targets.push(Target::Selector(selector.clone()));
        }
        targets.extend(
            self.profile
                .back_control_texts
                .iter()
                .map(|t| Target::Text(t.clone())),
        );

        let before = page.current_url();
        for target in targets {
            let present = match &target {
                Target::Selector(selector) => page.count(selector)? > 0,
                other => page.text_of(other)?.is_some(),
            };
            if !present {
                continue;
            }
            match page.click(&target, self.wait_ms()).await {
                Ok(()) if page.current_url() != before => return Ok(true),
                Ok(()) => continue,
                Err(e) if e.is_config() => return Err(e),
                Err(e) => log::debug!("Back control {} failed: {}", target, e),
            }
        }
        Ok(false)
    }

    fn extract_item(
        &self,
        reference: &str,
        link_text: Option<&str>,
        page: &dyn Page,
    ) -> Result<PropertySnapshot> {
        let tables = extract_tables(&page.content(), &self.profile.detail_table_selector)?;
        if tables.is_empty() {
            return Err(AppError::extraction("Structured table data not found on page"));
        }

        let identity = extract_identity(&tables);
        let fallback = identity
            .property_address
            .clone()
            .or_else(|| link_text.map(str::to_string))
            .unwrap_or_default();
        let address = derive_address(&tables, &fallback);
        if address.trim().is_empty() {
            return Err(AppError::extraction(
                "Property address could not be extracted from structured table data",
            ));
        }

        let total_due = derive_total_due(&tables);
        let final_url = page.current_url();
        Ok(PropertySnapshot {
            id: None,
            run_id: None,
            source_reference: reference.to_string(),
            account_number: extract_account_number(reference)
                .or_else(|| extract_account_number(&final_url)),
            final_url,
            redirect_chain: page.redirect_chain(),
            address,
            total_due,
            paid_status: PaidStatus::from_total(total_due),
            due_date: derive_due_date(&tables),
            property_number: identity.property_number,
            tax_map: identity.tax_map,
            raw_tables: tables,
            degraded: false,
            captured_at: Utc::now(),
        })
    }

    async fn record_success(
        &mut self,
        snapshot: PropertySnapshot,
        item_index: usize,
        page: &dyn Page,
        sink: &dyn ProgressSink,
    ) {
        log::info!(
            "Extracted {} ({}): {}",
            snapshot.address,
            snapshot.source_reference,
            snapshot.total_due
        );
        sink.emit(EventKind::PropertyScraped {
            reference: snapshot.source_reference.clone(),
            address: snapshot.address.clone(),
            total_due: snapshot.total_due,
            item_index,
        });

        let label = format!("item {} {}", item_index + 1, snapshot.address);
        if let Some(path) = sink.capture(&label, &page.content()).await {
            self.outcome.artifacts.push(path);
        }

        self.outcome.items.push(ItemOutcome::success(&snapshot));
        self.outcome.total_due += snapshot.total_due;
        self.outcome.processed += 1;
        self.snapshots.push(snapshot);
    }

    fn record_skip(
        &mut self,
        reference: &str,
        label: &str,
        error: &AppError,
        item_index: usize,
        sink: &dyn ProgressSink,
    ) {
        let reason = error.to_string();
        log::warn!("Skipping {} ({}): {}", label, reference, reason);
        sink.emit(EventKind::PropertyRowSkipped {
            reason: reason.clone(),
            property_label: label.to_string(),
            item_index,
        });
        self.outcome
            .items
            .push(ItemOutcome::skipped(reference, label, reason));
    }

    async fn degraded_fallback(&mut self, page: &mut dyn Page, sink: &dyn ProgressSink) -> Result<()> {
        let pattern = Regex::new(&self.profile.money_fallback_pattern).map_err(|e| {
            AppError::config(format!("invalid money_fallback_pattern: {e}"))
        })?;
        let url = page.current_url();
        let text = page.body_text();

        let matched = pattern
            .find(&text)
            .map(|m| m.as_str().trim().to_string())
            .zip(parse_money_with(&pattern, &text));
        let Some((matched, total_due)) = matched else {
            return Err(AppError::extraction(format!(
                "No structured table data or money value found on {url}"
            )));
        };
        log::warn!("Falling back to page-level money match '{}' on {}", matched, url);

        let content = page.content();
        let tables = extract_tables(&content, "table").unwrap_or_default();
        let fallback = document::title(&content).unwrap_or_else(|| url.clone());
        let address = derive_address(&tables, &fallback);

        self.outcome.degraded = Some(DegradedSample {
            url: url.clone(),
            pattern: self.profile.money_fallback_pattern.clone(),
            matched,
        });

        let snapshot = PropertySnapshot {
            id: None,
            run_id: None,
            source_reference: url.clone(),
            account_number: extract_account_number(&url),
            final_url: url,
            redirect_chain: page.redirect_chain(),
            address,
            total_due,
            paid_status: PaidStatus::from_total(total_due),
            due_date: None,
            property_number: None,
            tax_map: None,
            raw_tables: Vec::new(),
            degraded: true,
            captured_at: Utc::now(),
        };
        let index = self.outcome.items.len();
        self.record_success(snapshot, index, page, sink).await;
        Ok(())
    }
}

fn row_has_link(page: &dyn Page, row: &str, link: &str) -> Result<bool> {
    if page.count(row)? == 0 {
        return Ok(false);
    }
    let first_link = Target::Within {
        container: row.to_string(),
        index: 0,
        selector: link.to_string(),
    };
    Ok(page.text_of(&first_link)?.is_some())
}

/// Sum of item totals, `0.00` when there are none.
pub fn aggregate_total<'s>(totals: impl IntoIterator<Item = &'s Decimal>) -> Decimal {
    totals.into_iter().fold(zero_money(), |acc, t| acc + t)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::models::ItemStatus;
    use crate::services::fetch::{FetchRequest, FetchResponse, Fetcher, MemoryFetcher};
    use crate::services::session::HttpSession;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<EventKind>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    #[async_trait]
    impl ProgressSink for Recorder {
        fn emit(&self, kind: EventKind) {
            self.events.lock().unwrap().push(kind);
        }

        async fn capture(&self, label: &str, _html: &str) -> Option<String> {
            Some(format!("memory://{label}"))
        }
    }

    const BASE: &str = "https://portal.example.com";

    fn detail(address: &str, total: &str) -> String {
        format!(
            r#"<html><body>
            <a href="/results">Back to results</a>
            <table class="detail">
              <tr><th>Property Number</th><th>Tax Map</th><th>Property Address</th></tr>
              <tr><td>0562001300</td><td>012.-03-04.0</td><td>{address}</td></tr>
            </table>
            <table class="charges">
              <tr><td>City Tax</td><td>$10.00</td></tr>
              <tr><td>Total</td><td>{total}</td></tr>
            </table>
            </body></html>"#
        )
    }

    fn listing(rows: &[(&str, &str)]) -> String {
        let body: String = rows
            .iter()
            .map(|(href, text)| format!("<tr><td><a href=\"{href}\">{text}</a></td></tr>"))
            .collect();
        format!(
            "<html><body><h1>Results</h1><table class='results'><tbody>{body}</tbody></table></body></html>"
        )
    }

    fn detail_without_back(address: &str, total: &str) -> String {
        format!(
            r#"<html><body>
            <table class="detail">
              <tr><td>Property Address</td><td>{address}</td></tr>
              <tr><td>Total</td><td>{total}</td></tr>
            </table>
            </body></html>"#
        )
    }

    /// Fails the first request for one URL, then serves normally.
    struct FlakyFetcher {
        inner: MemoryFetcher,
        failing: String,
        failed: Mutex<bool>,
    }

    #[async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
            if request.url == self.failing {
                let mut failed = self.failed.lock().unwrap();
                if !*failed {
                    *failed = true;
                    return Err(AppError::navigation(&request.url, "connection reset"));
                }
            }
            self.inner.fetch(request).await
        }
    }

    fn profile() -> PortalProfile {
        let mut profile = PortalProfile::new("tax");
        profile.sources.push(format!("{BASE}/results"));
        profile.detail_wait_ms = 200;
        profile
    }

    async fn session(fetcher: MemoryFetcher, start: &str) -> HttpSession<MemoryFetcher> {
        let mut page = HttpSession::new(fetcher, Duration::from_millis(10));
        page.goto(start, 1_000).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_listing_mode_visits_every_row() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/results"),
                listing(&[("/d/1", "104 MOONEY AVE."), ("/d/2", "311 ACADEMY ST")]),
            )
            .with_page(&format!("{BASE}/d/1"), detail("104 MOONEY AVE.", "$1,234.56"))
            .with_page(&format!("{BASE}/d/2"), detail("311 ACADEMY ST", "$0.00"));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.total_due.to_string(), "1234.56");
        assert_eq!(snapshots[0].source_reference, format!("{BASE}/d/1"));
        assert_eq!(snapshots[0].property_number.as_deref(), Some("0562001300"));
        assert_eq!(snapshots[1].paid_status, PaidStatus::Paid);
        assert_eq!(outcome.artifacts.len(), 2);
        assert_eq!(
            sink.names(),
            vec![
                "item_started",
                "property_scraped",
                "item_started",
                "property_scraped"
            ]
        );
    }

    #[tokio::test]
    async fn test_broken_row_is_skipped_and_later_rows_visited() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/results"),
                listing(&[
                    ("/d/1", "First"),
                    ("/d/broken", "Broken"),
                    ("/d/3", "Third"),
                ]),
            )
            .with_page(&format!("{BASE}/d/1"), detail("1 FIRST ST", "$1.00"))
            .with_page(&format!("{BASE}/d/3"), detail("3 THIRD ST", "$3.00"));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].address, "3 THIRD ST");
        assert_eq!(outcome.total_due.to_string(), "4.00");
        let skipped: Vec<_> = outcome
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Skipped)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].label.as_deref(), Some("Broken"));
        assert!(sink.names().contains(&"property_row_skipped"));
    }

    #[tokio::test]
    async fn test_selector_fallback_is_used_and_announced() {
        let list = format!(
            "<html><body><ul>{}</ul></body></html>",
            "<li><a href=\"/d/1\">Only</a></li>"
        );
        let fetcher = MemoryFetcher::new()
            .with_page(&format!("{BASE}/results"), list)
            .with_page(&format!("{BASE}/d/1"), detail("9 LIST AVE", "$9.00"));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let mut profile = profile();
        profile.results_row_selector = "table.results tbody tr".into();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (_, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 1);
        let events = sink.events.lock().unwrap();
        match &events[0] {
            EventKind::ResultsLocatorResolved { row_selector, .. } => {
                assert_eq!(row_selector, "li")
            }
            other => panic!("unexpected first event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_direct_mode_respects_cap_and_skips_failures() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/accounts?number=111"),
                detail("111 MAIN ST", "$111.00"),
            )
            .with_page(
                &format!("{BASE}/accounts?number=333"),
                detail("333 MAIN ST", "$333.00"),
            )
            .with_page(
                &format!("{BASE}/accounts?number=444"),
                detail("444 MAIN ST", "$444.00"),
            );
        let mut page = HttpSession::new(fetcher, Duration::from_millis(10));
        let mut profile = profile();
        profile.direct_item_urls = Some(vec![
            format!("{BASE}/accounts?number=111"),
            format!("{BASE}/accounts?number=222"),
            format!("{BASE}/accounts?number=333"),
            format!("{BASE}/accounts?number=444"),
        ]);
        profile.max_items = 2;
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, "direct");
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].account_number.as_deref(), Some("111"));
        assert_eq!(snapshots[1].account_number.as_deref(), Some("333"));
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.items[1].status, ItemStatus::Skipped);
    }

    #[tokio::test]
    async fn test_degraded_fallback() {
        let fetcher = MemoryFetcher::new().with_page(
            &format!("{BASE}/results"),
            "<html><head><title>Account 7</title></head><body><p>Amount due: $1,245.67</p></body></html>",
        );
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].degraded);
        assert_eq!(snapshots[0].address, "Account 7");
        assert_eq!(snapshots[0].total_due.to_string(), "1245.67");
        assert_eq!(outcome.degraded.unwrap().matched, "$1,245.67");
    }

    #[tokio::test]
    async fn test_nothing_extractable_fails_source() {
        let fetcher = MemoryFetcher::new()
            .with_page(&format!("{BASE}/results"), "<html><body>No records</body></html>");
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        let err = controller.run(&mut page, &sink).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_failed_click_falls_back_to_following_href() {
        let inner = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/results"),
                listing(&[("/d/1", "104 MOONEY AVE.")]),
            )
            .with_page(&format!("{BASE}/d/1"), detail("104 MOONEY AVE.", "$12.00"));
        let fetcher = FlakyFetcher {
            inner,
            failing: format!("{BASE}/d/1"),
            failed: Mutex::new(false),
        };
        let mut page = HttpSession::new(fetcher, Duration::from_millis(10));
        page.goto(&format!("{BASE}/results"), 1_000).await.unwrap();
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].address, "104 MOONEY AVE.");
        assert!(outcome.items.iter().all(|i| i.status == ItemStatus::Success));
        assert_eq!(page.fetcher().inner.hits(&format!("{BASE}/d/1")), 1);
        assert!(*page.fetcher().failed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_inline_detail_is_found_by_detail_table_selector() {
        let html = String::from(
            r#"<html><body>
            <table class="results"><tbody>
              <tr><td><a href="javascript:void(0)">104 MOONEY AVE.</a></td></tr>
            </tbody></table>
            <table class="tax-detail">
              <tr><td>Property Address</td><td>104 MOONEY AVE.</td></tr>
              <tr><td>TOTAL</td><td>$75.25</td></tr>
            </table>
            </body></html>"#
        );
        let fetcher = MemoryFetcher::new().with_page(&format!("{BASE}/results"), html);
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let mut profile = profile();
        profile.results_row_selector = "table.results tbody tr".into();
        profile.detail_table_selector = "table.tax-detail".into();
        profile.detail_wait_ms = 60;
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_due.to_string(), "75.25");
        assert!(!snapshots[0].degraded);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(page.current_url(), format!("{BASE}/results"));
    }

    #[tokio::test]
    async fn test_rows_without_links_are_passed_over() {
        let html = String::from(
            "<html><body><table class='results'><tbody>\
             <tr><td><a href=\"/d/1\">First</a></td></tr>\
             <tr><td>No detail available</td></tr>\
             <tr><td><a href=\"/d/3\">Third</a></td></tr>\
             </tbody></table></body></html>"
        );
        let fetcher = MemoryFetcher::new()
            .with_page(&format!("{BASE}/results"), html)
            .with_page(&format!("{BASE}/d/1"), detail("1 FIRST ST", "$1.00"))
            .with_page(&format!("{BASE}/d/3"), detail("3 THIRD ST", "$3.00"));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(outcome.items.len(), 2);
        let started: Vec<usize> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EventKind::ItemStarted { item_index, .. } => Some(*item_index),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_returns_through_history_without_back_control() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/results"),
                listing(&[("/d/1", "First"), ("/d/2", "Second")]),
            )
            .with_page(&format!("{BASE}/d/1"), detail_without_back("1 FIRST ST", "$1.00"))
            .with_page(&format!("{BASE}/d/2"), detail_without_back("2 SECOND ST", "$2.00"));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        controller.run(&mut page, &sink).await.unwrap();
        let (_, snapshots) = controller.into_parts();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(page.current_url(), format!("{BASE}/results"));
        assert_eq!(page.fetcher().hits(&format!("{BASE}/results")), 1);
    }

    #[tokio::test]
    async fn test_lost_listing_fails_source() {
        let detail_page = String::from(
            r#"<html><body>
            <a href="/expired">Back to results</a>
            <table><tr><td>Property Address</td><td>1 FIRST ST</td></tr>
            <tr><td>Total</td><td>$1.00</td></tr></table>
            </body></html>"#
        );
        let fetcher = MemoryFetcher::new()
            .with_page(
                &format!("{BASE}/results"),
                listing(&[("/d/1", "First"), ("/d/2", "Second")]),
            )
            .with_page(&format!("{BASE}/d/1"), detail_page)
            .with_page(&format!("{BASE}/expired"), "<html><body>Session expired</body></html>");
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let mut profile = profile();
        profile.results_row_selector = "table.results tbody tr".into();
        profile.detail_wait_ms = 60;
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        let err = controller.run(&mut page, &sink).await.unwrap_err();
        assert!(matches!(err, AppError::Navigation { .. }));
        assert!(err.to_string().contains("results listing did not reappear"), "{err}");

        let (outcome, snapshots) = controller.into_parts();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(page.fetcher().hits(&format!("{BASE}/d/2")), 0);
    }

    #[tokio::test]
    async fn test_direct_item_redirect_is_observed_and_recorded() {
        let fetcher = MemoryFetcher::new()
            .with_redirect(
                &format!("{BASE}/accounts?number=111"),
                &format!("{BASE}/property/111"),
            )
            .with_page(&format!("{BASE}/property/111"), detail("111 MAIN ST", "$111.00"));
        let mut page = HttpSession::new(fetcher, Duration::from_millis(10));
        let mut profile = profile();
        profile.direct_item_urls = Some(vec![format!("{BASE}/accounts?number=111")]);
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, "direct");
        controller.run(&mut page, &sink).await.unwrap();
        let (outcome, snapshots) = controller.into_parts();

        let chain = vec![
            format!("{BASE}/accounts?number=111"),
            format!("{BASE}/property/111"),
        ];
        assert_eq!(snapshots[0].redirect_chain, chain);
        assert_eq!(snapshots[0].final_url, format!("{BASE}/property/111"));
        assert_eq!(snapshots[0].account_number.as_deref(), Some("111"));
        assert_eq!(outcome.items[0].redirect_chain, chain);

        let events = sink.events.lock().unwrap();
        match &events[1] {
            EventKind::UrlRedirectObserved {
                redirected,
                redirect_chain,
                index,
                ..
            } => {
                assert!(*redirected);
                assert_eq!(redirect_chain, &chain);
                assert_eq!(*index, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bare_numbers_do_not_satisfy_degraded_fallback() {
        let fetcher = MemoryFetcher::new().with_page(
            &format!("{BASE}/results"),
            "<html><body><p>No records found for tax year 2025</p></body></html>",
        );
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let profile = profile();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, format!("{BASE}/results"));
        let err = controller.run(&mut page, &sink).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));

        let (outcome, snapshots) = controller.into_parts();
        assert!(snapshots.is_empty());
        assert!(outcome.degraded.is_none());
    }

    #[tokio::test]
    async fn test_invalid_configured_selector_is_config_error() {
        let fetcher = MemoryFetcher::new()
            .with_page(&format!("{BASE}/results"), listing(&[("/d/1", "x")]));
        let mut page = session(fetcher, &format!("{BASE}/results")).await;
        let mut profile = profile();
        profile.results_row_selector = "tr[".into();
        let sink = Recorder::default();

        let mut controller = PaginationController::new(&profile, "x");
        let err = controller.run(&mut page, &sink).await.unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_aggregate_total() {
        let totals = [Decimal::new(150, 2), Decimal::new(250, 2)];
        assert_eq!(aggregate_total(&totals).to_string(), "4.00");
        assert_eq!(aggregate_total(&[]).to_string(), "0.00");
    }
}
