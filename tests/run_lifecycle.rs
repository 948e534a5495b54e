// tests/run_lifecycle.rs
//
// Full runs over an in-memory portal, persisted to a temporary directory.
//
use std::sync::Arc;
use std::time::Duration;

use taxwatch::events::EventHub;
use taxwatch::models::{Config, ItemStatus, PortalProfile, RunStatus};
use taxwatch::pipeline::RunOrchestrator;
use taxwatch::services::{HttpSession, MemoryFetcher};
use taxwatch::storage::{LocalStorage, RunStore};

const BASE: &str = "https://portal.example.com";

fn listing() -> String {
    format!(
        r#"<html><body>
        <h1>Search Results</h1>
        <table class="results"><tbody>
          <tr><td><a href="{BASE}/detail/1">104 MOONEY AVE.</a></td></tr>
          <tr><td><a href="{BASE}/detail/2">9 BROKEN RD.</a></td></tr>
          <tr><td><a href="{BASE}/detail/3">17 ELM ST.</a></td></tr>
        </tbody></table>
        </body></html>"#
    )
}

fn detail(number: &str, address: &str, total: &str) -> String {
    format!(
        r#"<html><body>
        <a href="{BASE}/results">Back to results</a>
        <table>
          <tr><th>Property Number</th><th>Tax Map</th><th>Property Address</th></tr>
          <tr><td>{number}</td><td>012.-03-04.0</td><td>{address}</td></tr>
        </table>
        <table>
          <tr><td>Description</td><td>Amount</td></tr>
          <tr><td>City Tax</td><td>$250.00</td></tr>
          <tr><td>TOTAL</td><td>{total}</td></tr>
          <tr><td>Due Date:</td><td>01/31/2025</td></tr>
        </table>
        </body></html>"#
    )
}

fn portal() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_page(&format!("{BASE}/results"), listing())
        .with_page(
            &format!("{BASE}/detail/1"),
            detail("0562001300", "104 MOONEY AVE.", "$1,234.56"),
        )
        .with_page(
            &format!("{BASE}/detail/3"),
            detail("0562001700", "17 ELM ST.", "$0.00"),
        )
}

fn config(root: &std::path::Path) -> Config {
    let mut profile = PortalProfile::new("tax");
    profile.sources = vec![format!("{BASE}/results")];
    profile.results_row_selector = "table.results tbody tr".into();
    profile.checkpoint_selector = Some("table.results".into());
    profile.checkpoint_min_count = Some(1);
    profile.checkpoint_timeout_ms = 200;
    profile.detail_wait_ms = 200;

    let mut config = Config::default();
    config.storage.root_dir = root.to_path_buf();
    config.profiles.push(profile);
    config
}

#[tokio::test]
async fn listing_run_skips_broken_row_and_commits_the_rest() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStorage::new(tmp.path()));
    let orchestrator =
        RunOrchestrator::new(Arc::new(config(tmp.path())), store.clone(), EventHub::new());
    let mut session = HttpSession::new(portal(), Duration::from_millis(10));

    let result = orchestrator.run("tax", &mut session).await.unwrap();
    assert!(result.is_success(), "{:?}", result.error_summary);
    assert_eq!(result.snapshot_count, 2);

    let source = &result.details.sources[0];
    let statuses: Vec<ItemStatus> = source.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Success, ItemStatus::Skipped, ItemStatus::Success]
    );
    assert!(source.checkpoint.is_some());
    assert_eq!(source.redirect_chain, vec![format!("{BASE}/results")]);
    assert_eq!(result.details.aggregate_total.to_string(), "1234.56");

    let types: Vec<&str> = orchestrator
        .hub()
        .history(result.run_id)
        .iter()
        .map(|e| e.kind.name())
        .filter(|name| *name != "screenshot_created")
        .collect();
    assert_eq!(
        types,
        vec![
            "run_started",
            "url_started",
            "url_redirect_observed",
            "checkpoint_validated",
            "item_started",
            "property_scraped",
            "item_started",
            "property_row_skipped",
            "item_started",
            "property_scraped",
            "db_committed",
            "run_finished",
        ]
    );

    let stored = store.get_run(result.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Success);
    assert!(stored.finished_at.is_some());

    let snapshots = store.snapshots_for_run(result.run_id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].address, "104 MOONEY AVE.");
    assert_eq!(snapshots[0].total_due.to_string(), "1234.56");
    assert_eq!(snapshots[0].due_date.as_deref(), Some("01/31/2025"));
    assert_eq!(snapshots[1].property_number.as_deref(), Some("0562001700"));

    let artifacts = std::fs::read_dir(tmp.path().join(format!("artifacts/run_{}", result.run_id)))
        .unwrap()
        .count();
    assert_eq!(artifacts, 2);
}

#[tokio::test]
async fn repeated_run_against_unchanged_portal_reports_no_change() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStorage::new(tmp.path()));
    let orchestrator =
        RunOrchestrator::new(Arc::new(config(tmp.path())), store.clone(), EventHub::new());
    let mut session = HttpSession::new(portal(), Duration::from_millis(10));

    let first = orchestrator.run("tax", &mut session).await.unwrap();
    let second = orchestrator.run("tax", &mut session).await.unwrap();
    assert!(first.is_success() && second.is_success());
    assert!(!second.details.changed);

    let history = store.property_history("0562001300", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].total_due, history[1].total_due);
    assert_ne!(history[0].run_id, history[1].run_id);

    session
        .fetcher()
        .set_page(&format!("{BASE}/detail/1"), detail("0562001300", "104 MOONEY AVE.", "$0.00"));
    let third = orchestrator.run("tax", &mut session).await.unwrap();
    assert!(third.details.changed);
    assert_eq!(third.details.changes.len(), 1);
    assert_eq!(third.details.changes[0].old_total_due.to_string(), "1234.56");

    let runs = store.list_runs("tax", 10).await.unwrap();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[0].id, third.run_id);
}

#[tokio::test]
async fn missing_checkpoint_fails_run_without_snapshots() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStorage::new(tmp.path()));
    let fetcher = MemoryFetcher::new().with_page(
        &format!("{BASE}/results"),
        "<html><body><p>Service temporarily unavailable</p></body></html>",
    );
    let orchestrator =
        RunOrchestrator::new(Arc::new(config(tmp.path())), store.clone(), EventHub::new());
    let mut session = HttpSession::new(fetcher, Duration::from_millis(10));

    let result = orchestrator.run("tax", &mut session).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(
        result.error_summary.as_deref(),
        Some("Run failed: 1 of 1 source(s) did not return structured table data")
    );
    assert!(store.snapshots_for_run(result.run_id).await.unwrap().is_empty());

    let source = &result.details.sources[0];
    assert_eq!(
        source.excerpt.as_deref(),
        Some("Service temporarily unavailable")
    );

    let finished = orchestrator
        .hub()
        .history(result.run_id)
        .into_iter()
        .filter(|e| e.is_terminal())
        .count();
    assert_eq!(finished, 1);
}
