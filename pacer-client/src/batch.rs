//! Staggered batch execution.

use crate::throttler::Throttler;
use pacer_core::{Outcome, PacerError, RequestSpec};
use serde_json::Value;
use std::time::Duration;

impl Throttler {
    /// Run `requests` one after another, sleeping `stagger` between them.
    ///
    /// Each request still goes through the cache, the queue and the retry
    /// engine. A failure is recorded and the batch carries on. The result
    /// has one outcome per request, in input order.
    pub async fn batch_requests(
        &self,
        requests: Vec<RequestSpec>,
        stagger: Duration,
    ) -> Vec<Outcome<Value>> {
        let total = requests.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, request) in requests.into_iter().enumerate() {
            if index > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            let url = request.url.clone();
            let result = self.fetch(request).await;
            if let Err(err) = &result {
                tracing::debug!(index, url = %url, error = %err, "Batch item failed");
            }
            outcomes.push(Outcome::from_result(index, result, PacerError::user_message));
        }

        tracing::debug!(
            total,
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            "Batch finished"
        );
        outcomes
    }

    /// [`batch_requests`](Self::batch_requests) with the configured stagger.
    pub async fn batch_requests_default(&self, requests: Vec<RequestSpec>) -> Vec<Outcome<Value>> {
        let stagger = self.config().batch_stagger();
        self.batch_requests(requests, stagger).await
    }
}
