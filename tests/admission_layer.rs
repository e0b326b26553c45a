use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};
use windowgate::{AdmissionLayer, GatedError, RateGate, RateLimitConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

#[tokio::test(start_paused = true)]
async fn layer_spaces_calls_by_window() {
    let gate = RateGate::new(RateLimitConfig::from_millis(2, 1000).unwrap()).unwrap();
    let start = Instant::now();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = seen.clone();
    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(gate)).service(service_fn(
        move |req: usize| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push((req, start.elapsed()));
                Ok::<_, TestError>(req * 10)
            }
        },
    ));

    let calls: Vec<_> = (0..5).map(|i| svc.clone().oneshot(i)).collect();
    let results = futures::future::join_all(calls).await;
    assert_eq!(results.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![0, 10, 20, 30, 40]);

    let seen = seen.lock().unwrap().clone();
    let order: Vec<_> = seen.iter().map(|(req, _)| *req).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);

    let per_window = |w: u64| {
        seen.iter()
            .filter(|(_, t)| *t >= Duration::from_secs(w) && *t < Duration::from_secs(w + 1))
            .count()
    };
    // Window resets admit one; the completion that follows admits the second.
    assert_eq!((per_window(0), per_window(1), per_window(2)), (2, 2, 1));
}

#[tokio::test]
async fn inner_errors_pass_through_and_still_notify() {
    let gate = RateGate::new(RateLimitConfig::from_millis(2, 60_000).unwrap()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut svc = AdmissionLayer::new(gate.clone()).layer(service_fn(move |_req: ()| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(TestError("upstream failed")) }
    }));

    let err = svc.ready().await.unwrap().call(()).await.unwrap_err();
    assert!(err.is_inner());
    assert_eq!(err.into_inner(), Some(TestError("upstream failed")));

    let err = svc.ready().await.unwrap().call(()).await.unwrap_err();
    assert_eq!(err.as_inner(), Some(&TestError("upstream failed")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(gate.snapshot().admitted, 2);
}

#[tokio::test]
async fn closed_gate_never_reaches_inner() {
    let gate = RateGate::new(RateLimitConfig::default()).unwrap();
    gate.shutdown();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(gate)).service(service_fn(
        move |_req: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TestError>(()) }
        },
    ));

    let err = svc.oneshot(()).await.unwrap_err();
    assert!(matches!(err, GatedError::Closed));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

