//! Change detection between a run's snapshots and earlier ones.
//!
//! A property counts as changed when its total due, paid status or due
//! date differ from the most recent prior snapshot with the same identity.
//! Due dates are only compared when both snapshots carry one. A property
//! seen for the first time is not a change.

use crate::error::Result;
use crate::models::{ChangeNotice, PropertySnapshot};
use crate::storage::RunStore;

/// Compares new snapshots against stored history.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Notice describing how `current` differs from `previous`, if it does.
    pub fn compare(&self, previous: &PropertySnapshot, current: &PropertySnapshot) -> Option<ChangeNotice> {
        let due_date_changed = match (&previous.due_date, &current.due_date) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        let changed = previous.total_due != current.total_due
            || previous.paid_status != current.paid_status
            || due_date_changed;

        changed.then(|| ChangeNotice {
            identity: current.identity(),
            address: current.address.clone(),
            old_total_due: previous.total_due,
            new_total_due: current.total_due,
            old_paid_status: previous.paid_status,
            new_paid_status: current.paid_status,
            old_due_date: previous.due_date.clone(),
            new_due_date: current.due_date.clone(),
        })
    }

    /// Change notices for `snapshots` against what `store` already holds.
    ///
    /// Must run before the snapshots are committed, otherwise each one
    /// would be compared with itself.
    pub async fn detect(
        &self,
        store: &dyn RunStore,
        snapshots: &[PropertySnapshot],
    ) -> Result<Vec<ChangeNotice>> {
        let mut notices = Vec::new();
        for snapshot in snapshots {
            let identity = snapshot.identity();
            let Some(previous) = store.most_recent_prior_snapshot(&identity).await? else {
                log::debug!("No prior snapshot for {}", identity);
                continue;
            };
            if let Some(notice) = self.compare(&previous, snapshot) {
                log::info!(
                    "Change detected for {}: {} -> {}",
                    identity,
                    notice.old_total_due,
                    notice.new_total_due
                );
                notices.push(notice);
            }
        }
        Ok(notices)
    }
}
