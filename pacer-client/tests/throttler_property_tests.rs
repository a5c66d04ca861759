use pacer_client::{RequestSpec, ThrottleConfig, Throttler};
use pacer_test_utils::fixtures::{immediate_config, ok_json, status};
use pacer_test_utils::generators::{arb_retryable_status, arb_terminal_status};
use pacer_test_utils::MockTransport;
use proptest::prelude::*;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

fn block_on_paused<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// However many requests arrive at once, no more than `max_concurrent`
    /// reach the transport simultaneously, and every one completes.
    #[test]
    fn prop_in_flight_never_exceeds_limit(max_concurrent in 1usize..6, requests in 1usize..16) {
        let (peak, succeeded, calls) = block_on_paused(async move {
            let transport = MockTransport::new();
            for i in 0..requests {
                transport.on(
                    format!("/api/services/{}", i),
                    ok_json(json!(i)).with_latency(Duration::from_millis(20)),
                );
            }
            let config = ThrottleConfig { max_concurrent, ..immediate_config() };
            let throttler = Throttler::with_transport(config, transport.clone()).unwrap();

            let results = futures_util::future::join_all(
                (0..requests).map(|i| throttler.get(format!("/api/services/{}", i))),
            )
            .await;
            let succeeded = results.iter().filter(|r| r.is_ok()).count();
            (transport.peak_in_flight(), succeeded, transport.call_count())
        });

        prop_assert!(peak <= max_concurrent);
        prop_assert_eq!(peak, max_concurrent.min(requests));
        prop_assert_eq!(succeeded, requests);
        prop_assert_eq!(calls, requests);
    }

    /// A persistently retryable failure is attempted exactly `retry_attempts` times.
    #[test]
    fn prop_retryable_failures_use_every_attempt(code in arb_retryable_status(), attempts in 1u32..5) {
        let calls = block_on_paused(async move {
            let transport = MockTransport::new();
            transport.on("/api/bookings", status(code));
            let config = ThrottleConfig {
                retry_attempts: attempts,
                retry_delay_ms: 10,
                ..immediate_config()
            };
            let throttler = Throttler::with_transport(config, transport.clone()).unwrap();
            let result = throttler.get("/api/bookings").await;
            assert_eq!(result.unwrap_err().as_request().and_then(|e| e.status()), Some(code));
            transport.call_count()
        });
        prop_assert_eq!(calls, attempts as usize);
    }

    /// Client errors other than 429 are never retried.
    #[test]
    fn prop_terminal_failures_attempt_once(code in arb_terminal_status(), attempts in 1u32..6) {
        let calls = block_on_paused(async move {
            let transport = MockTransport::new();
            transport.on("/api/reviews", status(code));
            let config = ThrottleConfig { retry_attempts: attempts, ..immediate_config() };
            let throttler = Throttler::with_transport(config, transport.clone()).unwrap();
            assert!(throttler.get("/api/reviews").await.is_err());
            transport.call_count()
        });
        prop_assert_eq!(calls, 1);
    }

    /// Batch outcomes line up with their inputs whatever fails.
    #[test]
    fn prop_batch_outcomes_match_input_order(failing in proptest::collection::vec(any::<bool>(), 0..8)) {
        let expected = failing.clone();
        let outcomes = block_on_paused(async move {
            let transport = MockTransport::new();
            let mut requests = Vec::new();
            for (i, fails) in failing.iter().enumerate() {
                let url = format!("/api/categories/{}", i);
                transport.on(url.clone(), if *fails { status(422) } else { ok_json(json!(i)) });
                requests.push(RequestSpec::get(url));
            }
            let throttler = Throttler::with_transport(immediate_config(), transport).unwrap();
            throttler.batch_requests(requests, Duration::from_millis(5)).await
        });

        prop_assert_eq!(outcomes.len(), expected.len());
        for (i, (outcome, fails)) in outcomes.iter().zip(&expected).enumerate() {
            prop_assert_eq!(outcome.index(), i);
            prop_assert_eq!(outcome.is_success(), !fails);
        }
    }
}
