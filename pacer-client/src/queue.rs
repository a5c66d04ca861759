//! FIFO request queue with a concurrency limit.
//!
//! Jobs are admitted in enqueue order while fewer than `max_concurrent` are
//! running. When a job finishes its slot is released, the queue pauses for
//! `delay_between_requests` if more work is waiting, then admits again.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pacer_core::{new_request_id, CancellationToken, RequestError, RequestId, ThrottleConfig};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub type JobResult = Result<Value, RequestError>;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, JobResult> + Send>;

struct QueuedRequest {
    id: RequestId,
    url: String,
    cancel: Option<CancellationToken>,
    job: Job,
    responder: oneshot::Sender<JobResult>,
    enqueued_at: Instant,
}

impl QueuedRequest {
    fn is_abandoned(&self) -> bool {
        self.responder.is_closed() || self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    active: usize,
}

struct QueueInner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    delay_between_requests: Duration,
}

/// Bounded-concurrency FIFO queue. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(max_concurrent: usize, delay_between_requests: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                max_concurrent: max_concurrent.max(1),
                delay_between_requests,
            }),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.max_concurrent, config.delay_between_requests())
    }

    /// Append a job to the tail of the queue.
    ///
    /// The returned future settles with the job's result once it has been
    /// admitted and run. It settles early with `Cancelled` if `cancel` fires
    /// while the job is still waiting. The job runs on its own task, so
    /// dropping the returned future does not stop a job that is already
    /// running; a job whose caller has gone away before admission is skipped.
    pub fn enqueue<F, Fut>(
        &self,
        url: impl Into<String>,
        cancel: Option<CancellationToken>,
        job: F,
    ) -> impl Future<Output = JobResult> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let url = url.into();
        let (responder, receiver) = oneshot::channel();
        let request = QueuedRequest {
            id: new_request_id(),
            url: url.clone(),
            cancel: cancel.clone(),
            job: Box::new(move || job().boxed()),
            responder,
            enqueued_at: Instant::now(),
        };

        {
            let mut state = self.inner.lock();
            state.pending.push_back(request);
            tracing::trace!(
                url = %url,
                pending = state.pending.len(),
                active = state.active,
                "Request enqueued"
            );
        }
        self.inner.admit();

        async move {
            let cancelled = RequestError::Cancelled { url: url.clone() };
            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    result = receiver => result.unwrap_or(Err(cancelled)),
                    _ = token.cancelled() => Err(cancelled),
                },
                None => receiver.await.unwrap_or(Err(cancelled)),
            }
        }
    }

    /// Jobs currently running.
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Jobs waiting for admission.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("delay_between_requests", &self.inner.delay_between_requests)
            .field("active", &self.active())
            .field("pending", &self.pending())
            .finish()
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission loop: start queued jobs while capacity allows.
    fn admit(self: &Arc<Self>) {
        let admitted = {
            let mut state = self.lock();
            let mut admitted = Vec::new();
            while state.active < self.max_concurrent {
                let Some(request) = state.pending.pop_front() else {
                    break;
                };
                if request.is_abandoned() {
                    tracing::debug!(request_id = %request.id, url = %request.url, "Skipping abandoned request");
                    let _ = request.responder.send(Err(RequestError::Cancelled {
                        url: request.url,
                    }));
                    continue;
                }
                state.active += 1;
                admitted.push(request);
            }
            admitted
        };

        for request in admitted {
            tokio::spawn(Arc::clone(self).run(request));
        }
    }

    async fn run(self: Arc<Self>, request: QueuedRequest) {
        let QueuedRequest {
            id,
            url,
            job,
            responder,
            enqueued_at,
            ..
        } = request;

        tracing::debug!(
            request_id = %id,
            url = %url,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "Request admitted"
        );

        // Run on a separate task so a panicking job still releases its slot.
        let result = match tokio::spawn(job()).await {
            Ok(result) => result,
            Err(err) => Err(RequestError::Network {
                url: url.clone(),
                reason: format!("request task failed: {}", err),
            }),
        };
        let _ = responder.send(result);

        let more_waiting = {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            !state.pending.is_empty()
        };

        if more_waiting && !self.delay_between_requests.is_zero() {
            tokio::time::sleep(self.delay_between_requests).await;
        }
        self.admit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_test_utils::settle;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A job that blocks until its sender fires, counting itself in flight.
    fn held_job(
        in_flight: Arc<AtomicUsize>,
        started: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> (
        oneshot::Sender<()>,
        impl FnOnce() -> BoxFuture<'static, JobResult> + Send + 'static,
    ) {
        let (release, hold) = oneshot::channel::<()>();
        let job = move || {
            async move {
                started.lock().unwrap().push(name);
                in_flight.fetch_add(1, Ordering::SeqCst);
                let _ = hold.await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(name))
            }
            .boxed()
        };
        (release, job)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_and_release_admits_one() {
        let queue = RequestQueue::new(2, Duration::ZERO);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Mutex::new(Vec::new()));

        let mut releases = Vec::new();
        let mut handles = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (release, job) = held_job(in_flight.clone(), started.clone(), name);
            releases.push(release);
            handles.push(tokio::spawn(queue.enqueue(name, None, job)));
        }
        settle().await;

        assert_eq!(in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(queue.active(), 2);
        assert_eq!(queue.pending(), 2);

        let release_a = releases.remove(0);
        release_a.send(()).unwrap();
        settle().await;

        assert_eq!(in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending(), 1);
        assert_eq!(*started.lock().unwrap(), vec!["a", "b", "c"]);

        for release in releases {
            let _ = release.send(());
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission_with_single_slot() {
        let queue = RequestQueue::new(1, Duration::ZERO);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for name in ["A", "B", "C"] {
            let order = order.clone();
            handles.push(tokio::spawn(queue.enqueue(name, None, move || async move {
                order.lock().unwrap().push(name);
                Ok(json!(name))
            })));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_requests_spaces_admissions() {
        let queue = RequestQueue::new(1, Duration::from_millis(150));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let starts = starts.clone();
            handles.push(tokio::spawn(queue.enqueue("/x", None, move || async move {
                starts.lock().unwrap().push(Instant::now());
                Ok(Value::Null)
            })));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(150), "gap was {:?}", gap);
            assert!(gap < Duration::from_millis(160), "gap was {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_pass_through_unchanged() {
        let queue = RequestQueue::new(1, Duration::ZERO);
        let err = RequestError::HttpStatus {
            url: "/x".to_string(),
            status: 404,
            message: "Not found".to_string(),
        };
        let expected = err.clone();
        let result = queue.enqueue("/x", None, move || async move { Err(err) }).await;
        assert_eq!(result, Err(expected));
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting_is_never_run() {
        let queue = RequestQueue::new(1, Duration::ZERO);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Mutex::new(Vec::new()));

        let (release, blocker) = held_job(in_flight.clone(), started.clone(), "blocker");
        let first = tokio::spawn(queue.enqueue("/blocker", None, blocker));

        let token = CancellationToken::new();
        let (_keep, waiting) = held_job(in_flight.clone(), started.clone(), "waiting");
        let second = tokio::spawn(queue.enqueue("/waiting", Some(token.clone()), waiting));
        settle().await;

        token.cancel();
        let result = second.await.unwrap();
        assert!(matches!(result, Err(RequestError::Cancelled { .. })));

        release.send(()).unwrap();
        first.await.unwrap().unwrap();
        settle().await;

        assert_eq!(*started.lock().unwrap(), vec!["blocker"]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_releases_slot() {
        let queue = RequestQueue::new(1, Duration::ZERO);
        let failed = queue
            .enqueue("/boom", None, || async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            })
            .await;
        assert!(matches!(failed, Err(RequestError::Network { .. })));

        let ok = queue.enqueue("/ok", None, || async { Ok(json!(1)) }).await;
        assert_eq!(ok, Ok(json!(1)));
    }
}
