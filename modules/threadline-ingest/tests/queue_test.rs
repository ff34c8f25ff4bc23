//! Serial request lane behaviour under virtual time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;

use threadline_ingest::queue::backoff_delay;
use threadline_ingest::{ClientError, ClientResult, QueueConfig, QueueError, SerialRequestQueue};

type Log = Arc<Mutex<Vec<String>>>;

/// An operation that logs every attempt and fails its first `fail_times`
/// attempts with a transient error.
fn op(
    log: &Log,
    name: &'static str,
    fail_times: u32,
) -> impl FnMut() -> BoxFuture<'static, ClientResult<&'static str>> + Send + 'static {
    let log = log.clone();
    let attempts = Arc::new(AtomicU32::new(0));
    move || {
        let log = log.clone();
        let attempts = attempts.clone();
        async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < fail_times {
                log.lock().unwrap().push(format!("{name} failed"));
                return Err(ClientError::Transient(format!("{name} attempt {n}")));
            }
            log.lock().unwrap().push(name.to_string());
            Ok(name)
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn failing_head_is_retried_before_later_jobs_run() {
    let queue = SerialRequestQueue::new(QueueConfig::default());
    let log: Log = Arc::default();

    let (o1, o2, o3) = tokio::join!(
        queue.submit("o1", op(&log, "O1", 1)),
        queue.submit("o2", op(&log, "O2", 0)),
        queue.submit("o3", op(&log, "O3", 0)),
    );

    assert_eq!(o1.unwrap(), "O1");
    assert_eq!(o2.unwrap(), "O2");
    assert_eq!(o3.unwrap(), "O3");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["O1 failed", "O1", "O2", "O3"]
    );
    assert_eq!(queue.depth(), 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_across_consecutive_failures() {
    let queue = SerialRequestQueue::new(QueueConfig::default().without_jitter());
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::default();

    let seen = attempts.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let result = queue
        .submit("flaky", move || {
            let seen = seen.clone();
            let calls = calls.clone();
            async move {
                seen.lock().unwrap().push(Instant::now());
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(ClientError::RateLimited { retry_after: None })
                } else {
                    Ok(())
                }
            }
        })
        .await;
    assert!(result.is_ok());

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 4);
    let waits: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();

    assert!(waits.windows(2).all(|w| w[0] < w[1]), "waits not increasing: {waits:?}");
    let unit = Duration::from_millis(1000);
    let expected: Vec<Duration> = (1..=3).map(|n| backoff_delay(unit, 1, n)).collect();
    assert_eq!(waits, expected);
    assert_eq!(waits[0], Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn jitter_separates_consecutive_jobs() {
    let queue = SerialRequestQueue::new(QueueConfig::default());

    let first = queue.submit("first", || async { Ok(Instant::now()) });
    let second = queue.submit("second", || async { Ok(Instant::now()) });
    let (first, second) = tokio::join!(first, second);

    let gap = second.unwrap() - first.unwrap();
    assert!(gap >= Duration::from_millis(1500), "gap too short: {gap:?}");
    assert!(gap < Duration::from_millis(3500), "gap too long: {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn non_retryable_errors_surface_immediately() {
    let queue = SerialRequestQueue::new(QueueConfig::default().without_jitter());
    let calls = Arc::new(AtomicU32::new(0));

    let counted = calls.clone();
    let err = queue
        .submit("missing", move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClientError::NotFound("42".into()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Client(ClientError::NotFound(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let auth = queue
        .submit("auth", || async {
            Err::<(), _>(ClientError::Auth("revoked".into()))
        })
        .await
        .unwrap_err();
    assert!(auth.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn retry_cap_gives_up_and_frees_the_lane() {
    let queue = SerialRequestQueue::new(
        QueueConfig::default()
            .without_jitter()
            .with_max_retries(Some(2)),
    );
    let log: Log = Arc::default();

    let (stuck, next) = tokio::join!(
        queue.submit("stuck", op(&log, "STUCK", u32::MAX)),
        queue.submit("next", op(&log, "NEXT", 0)),
    );

    match stuck.unwrap_err() {
        QueueError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, ClientError::Transient(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(next.unwrap(), "NEXT");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["STUCK failed", "STUCK failed", "STUCK failed", "NEXT"]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_submitters_are_served_in_order() {
    let queue = Arc::new(SerialRequestQueue::new(QueueConfig::default().without_jitter()));
    let log: Log = Arc::default();

    let mut handles = Vec::new();
    for i in 0..5u32 {
        let queue = queue.clone();
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            queue
                .submit("job", move || {
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push(i.to_string());
                        Ok(i)
                    }
                })
                .await
        }));
        // Let the spawned task enqueue before the next one starts.
        tokio::task::yield_now().await;
    }

    let results: Vec<u32> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(results, vec![0, 1, 2, 3, 4]);
    assert_eq!(*log.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
}
