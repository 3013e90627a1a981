//! Debounced propagation driver
//!
//! A background tokio task receives propagation requests, waits for a
//! quiet period in which no newer request arrives, and then issues only
//! the latest one. Calls are not serialized: a new request goes out even
//! while an older one is still in flight, and the session discards the
//! older answer by sequence number when it arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client::SchemaInferenceClient;
use super::propagation::{PropagationOutcome, PropagationRequest};

/// Handle to the propagation task
pub struct PropagationDriver {
    requests: mpsc::UnboundedSender<PropagationRequest>,
    outcomes: mpsc::UnboundedReceiver<PropagationOutcome>,
    task: JoinHandle<()>,
}

impl PropagationDriver {
    /// Spawn the driver on the current tokio runtime
    pub fn spawn(client: Arc<dyn SchemaInferenceClient>, debounce: Duration) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(client, debounce, request_rx, outcome_tx));

        Self {
            requests: request_tx,
            outcomes: outcome_rx,
            task,
        }
    }

    /// Queue a request; it replaces any request still waiting out the debounce
    pub fn submit(&self, request: PropagationRequest) {
        if self.requests.send(request).is_err() {
            log::warn!("Propagation driver has stopped, dropping request");
        }
    }

    /// Next outcome if one is ready
    pub fn try_next_outcome(&mut self) -> Option<PropagationOutcome> {
        self.outcomes.try_recv().ok()
    }

    /// Wait for the next outcome
    pub async fn next_outcome(&mut self) -> Option<PropagationOutcome> {
        self.outcomes.recv().await
    }
}

impl Drop for PropagationDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    client: Arc<dyn SchemaInferenceClient>,
    debounce: Duration,
    mut requests: mpsc::UnboundedReceiver<PropagationRequest>,
    outcomes: mpsc::UnboundedSender<PropagationOutcome>,
) {
    while let Some(mut request) = requests.recv().await {
        // Keep the newest request until the stream goes quiet
        loop {
            match tokio::time::timeout(debounce, requests.recv()).await {
                Ok(Some(newer)) => request = newer,
                Ok(None) | Err(_) => break,
            }
        }

        log::debug!(
            "Issuing propagation request #{} (revision {})",
            request.sequence,
            request.revision
        );

        let client = client.clone();
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            let result = client.infer(&request.body).await;
            let outcome = PropagationOutcome::from_result(&request, result);
            if outcomes.send(outcome).is_err() {
                log::debug!(
                    "Propagation outcome #{} dropped, session is gone",
                    request.sequence
                );
            }
        });
    }
}
