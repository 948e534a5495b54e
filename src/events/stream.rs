// src/events/stream.rs

//! Text event-stream framing for run observers.

use std::time::Duration;

use chrono::Utc;
use futures::Stream;

use crate::events::Subscription;
use crate::models::RunEvent;

/// `data: <json>\n\n` frame for one event.
pub fn data_frame(event: &RunEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(e) => {
            log::error!("Failed to serialize {} event: {}", event.kind.name(), e);
            format!(": unserializable {} event\n\n", event.kind.name())
        }
    }
}

/// Comment frame sent on idle periods.
pub fn keepalive_frame() -> String {
    format!(": keepalive {}\n\n", Utc::now().timestamp())
}

/// Observer of a single run.
///
/// Waits on the subscription with a bounded wait, producing keep-alive
/// comments while idle. Ends right after `run_finished` and unsubscribes.
pub struct EventStream {
    subscription: Subscription,
    keepalive: Duration,
    finished: bool,
}

impl EventStream {
    pub fn new(subscription: Subscription, keepalive: Duration) -> Self {
        Self {
            subscription,
            keepalive,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next frame, or `None` once the run has finished.
    pub async fn next_frame(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.keepalive, self.subscription.recv()).await {
            Ok(Some(event)) => {
                if event.is_terminal() {
                    self.finish();
                }
                Some(data_frame(&event))
            }
            Ok(None) => {
                self.finish();
                None
            }
            Err(_) => Some(keepalive_frame()),
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.subscription.unsubscribe();
    }

    /// The frames as a stream.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_frame().await.map(|frame| (frame, stream))
        })
    }
}
