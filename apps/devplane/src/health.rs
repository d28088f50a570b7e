//! # Health convergence
//!
//! Turns conditions reported asynchronously by background controllers into
//! a synchronous wait with a deadline. Each poll walks
//! `Unknown -> Pending -> (Healthy | Failed | TimedOut)`; a cancel signal
//! stops it at once, mid-fetch or mid-sleep.

use crate::error::ConvergenceError;
use cluster_client::{ResourceClient, ResourceRef};
use crds::{condition_is_true, Condition, CONDITION_HEALTHY, CONDITION_INSTALLED};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Health derived from one fetch of a resource's conditions.
///
/// A missing `Installed` or `Healthy` condition reads as `false`: not yet
/// healthy, which is not the same as failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub resource: String,
    pub installed: bool,
    pub healthy: bool,
    pub conditions: Vec<Condition>,
}

impl HealthSnapshot {
    pub fn from_conditions(resource: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            resource: resource.into(),
            installed: condition_is_true(&conditions, CONDITION_INSTALLED),
            healthy: condition_is_true(&conditions, CONDITION_HEALTHY),
            conditions,
        }
    }
}

/// Package readiness: both `Installed` and `Healthy` are True.
pub fn installed_and_healthy(snapshot: &HealthSnapshot) -> bool {
    snapshot.installed && snapshot.healthy
}

/// Predicate on a single condition type, e.g. a CRD's `Established`.
pub fn condition_true(type_: &'static str) -> impl Fn(&HealthSnapshot) -> bool + Send + Sync {
    move |snapshot| condition_is_true(&snapshot.conditions, type_)
}

/// Poller state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Unknown,
    Pending,
    Healthy,
    Failed,
    TimedOut,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollState::Unknown => "unknown",
            PollState::Pending => "pending",
            PollState::Healthy => "healthy",
            PollState::Failed => "failed",
            PollState::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Total time allowed, measured from the first fetch
    pub deadline: Duration,
    /// Consecutive fetch errors tolerated before giving up
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(300),
            max_consecutive_failures: 5,
        }
    }
}

struct Tracker<'a> {
    resource: &'a str,
    state: PollState,
}

impl Tracker<'_> {
    fn enter(&mut self, next: PollState) {
        if self.state != next {
            debug!("{}: {} -> {}", self.resource, self.state, next);
            self.state = next;
        }
    }
}

/// Poll `target` until `predicate` holds, the deadline passes, fetches keep
/// failing, or `cancel` fires.
///
/// `NotFound` counts as pending: the object may not have been created by
/// its controller yet.
pub async fn wait_until_healthy<F>(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    predicate: &F,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<HealthSnapshot, ConvergenceError>
where
    F: Fn(&HealthSnapshot) -> bool + Sync + ?Sized,
{
    let resource = target.to_string();
    let started = Instant::now();
    let deadline = started + config.deadline;
    let mut tracker = Tracker {
        resource: &resource,
        state: PollState::Unknown,
    };
    let mut last: Option<HealthSnapshot> = None;
    let mut failures = 0u32;

    loop {
        if Instant::now() >= deadline {
            tracker.enter(PollState::TimedOut);
            warn!("Timed out after {:?} waiting for {}", config.deadline, resource);
            return Err(ConvergenceError::TimedOut {
                resource,
                waited: started.elapsed(),
                last,
            });
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ConvergenceError::Cancelled { resource, last });
            }
            fetched = tokio::time::timeout_at(deadline, client.conditions(target)) => fetched,
        };

        match fetched {
            // Deadline hit mid-fetch; the check above reports it.
            Err(_elapsed) => continue,
            Ok(Ok(conditions)) => {
                failures = 0;
                let snapshot = HealthSnapshot::from_conditions(resource.clone(), conditions);
                if predicate(&snapshot) {
                    tracker.enter(PollState::Healthy);
                    info!("{} is healthy after {:?}", resource, started.elapsed());
                    return Ok(snapshot);
                }
                tracker.enter(PollState::Pending);
                last = Some(snapshot);
            }
            Ok(Err(e)) if e.is_not_found() => {
                failures = 0;
                tracker.enter(PollState::Pending);
                debug!("{} not found yet", resource);
            }
            Ok(Err(e)) => {
                failures += 1;
                warn!(
                    "Failed to read conditions of {} ({}/{}): {}",
                    resource, failures, config.max_consecutive_failures, e
                );
                if failures >= config.max_consecutive_failures {
                    tracker.enter(PollState::Failed);
                    return Err(ConvergenceError::Unreachable {
                        resource,
                        failures,
                        last_error: e,
                    });
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            continue;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ConvergenceError::Cancelled { resource, last });
            }
            _ = tokio::time::sleep(config.interval.min(remaining)) => {}
        }
    }
}

/// Poll every target concurrently, at most `max_concurrency` at a time.
///
/// Succeeds only if every poll succeeds. The error lists every failed
/// resource, in target order.
pub async fn wait_all_healthy<F>(
    client: &dyn ResourceClient,
    targets: &[ResourceRef],
    predicate: &F,
    config: &PollConfig,
    cancel: &CancellationToken,
    max_concurrency: usize,
) -> Result<Vec<HealthSnapshot>, ConvergenceError>
where
    F: Fn(&HealthSnapshot) -> bool + Sync + ?Sized,
{
    // Built eagerly: a lazy `map` closure over borrowed targets is not
    // general enough to be `Send` inside an async-trait method.
    let polls: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(index, target)| async move {
            (index, wait_until_healthy(client, target, predicate, config, cancel).await)
        })
        .collect();
    let mut results: Vec<(usize, Result<HealthSnapshot, ConvergenceError>)> = stream::iter(polls)
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let mut healthy = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (index, result) in results {
        match result {
            Ok(snapshot) => healthy.push(snapshot),
            Err(e) => failures.push((targets[index].to_string(), e)),
        }
    }

    if failures.is_empty() {
        Ok(healthy)
    } else {
        Err(ConvergenceError::Aggregate {
            failures,
            total: targets.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::{MockOp, MockResourceClient, ResourceError};
    use crds::ConditionStatus;

    fn provider(name: &str) -> ResourceRef {
        ResourceRef::cluster("pkg.crossplane.io", "v1", "Provider", name)
    }

    fn ready() -> Vec<Condition> {
        vec![
            Condition::new(CONDITION_INSTALLED, ConditionStatus::True),
            Condition::new(CONDITION_HEALTHY, ConditionStatus::True),
        ]
    }

    fn unhealthy() -> Vec<Condition> {
        vec![
            Condition::new(CONDITION_INSTALLED, ConditionStatus::True),
            Condition::new(CONDITION_HEALTHY, ConditionStatus::False).with_message("crashloop"),
        ]
    }

    /// Healthy on the k-th fetch (0-based).
    fn healthy_after(mock: &MockResourceClient, target: &ResourceRef, k: usize) {
        let mut script = vec![unhealthy(); k];
        script.push(ready());
        mock.script_conditions(target, script);
    }

    fn poll(interval: u64, deadline: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(interval),
            deadline: Duration::from_secs(deadline),
            max_consecutive_failures: 3,
        }
    }

    #[test]
    fn test_missing_conditions_read_as_not_yet_healthy() {
        let snapshot = HealthSnapshot::from_conditions(
            "Provider/p",
            vec![Condition::new(CONDITION_INSTALLED, ConditionStatus::True)],
        );
        assert!(snapshot.installed);
        assert!(!snapshot.healthy);
        assert!(!installed_and_healthy(&snapshot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_when_deadline_exceeds_k_ticks() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        healthy_after(&mock, &target, 3);

        let snapshot = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(2, 7), &CancellationToken::new())
            .await
            .unwrap();
        assert!(snapshot.healthy);
        assert_eq!(mock.calls(MockOp::Conditions), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_deadline_is_short_of_k_ticks() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        healthy_after(&mock, &target, 3);

        let err = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(2, 5), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ConvergenceError::TimedOut { last: Some(last), .. } => {
                assert!(!last.healthy);
                assert_eq!(last.conditions, unhealthy());
            }
            other => panic!("expected TimedOut with snapshot, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_pending_not_failure() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        for _ in 0..5 {
            mock.fail_next(MockOp::Conditions, None, ResourceError::NotFound("p".into()));
        }
        healthy_after(&mock, &target, 0);

        let result = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(1, 60), &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_errors_make_resource_unreachable() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        healthy_after(&mock, &target, 0);
        for _ in 0..3 {
            mock.fail_next(MockOp::Conditions, None, ResourceError::Transient("eof".into()));
        }

        let err = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(1, 60), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergenceError::Unreachable { failures: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_errors_are_tolerated() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        healthy_after(&mock, &target, 2);
        mock.fail_next(MockOp::Conditions, None, ResourceError::Transient("eof".into()));
        mock.fail_next(MockOp::Conditions, None, ResourceError::Transient("eof".into()));

        let result = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(1, 60), &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep_promptly() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        mock.script_conditions(&target, vec![unhealthy()]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(60, 600), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergenceError::Cancelled { last: Some(_), .. }));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_reports_every_failure() {
        let mock = MockResourceClient::new();
        let targets = vec![provider("a"), provider("b"), provider("c")];
        healthy_after(&mock, &targets[0], 1);
        mock.script_conditions(&targets[1], vec![unhealthy()]);
        mock.script_conditions(&targets[2], vec![vec![]]);

        let err = wait_all_healthy(&mock, &targets, &installed_and_healthy, &poll(1, 10), &CancellationToken::new(), 2)
            .await
            .unwrap_err();
        match err {
            ConvergenceError::Aggregate { failures, total } => {
                assert_eq!(total, 3);
                let names: Vec<_> = failures.iter().map(|(r, _)| r.as_str()).collect();
                assert_eq!(names, vec!["Provider/b", "Provider/c"]);
            }
            other => panic!("expected Aggregate, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_succeeds_when_all_converge() {
        let mock = MockResourceClient::new();
        let targets = vec![provider("a"), provider("b")];
        healthy_after(&mock, &targets[0], 2);
        healthy_after(&mock, &targets[1], 0);

        let snapshots = wait_all_healthy(&mock, &targets, &installed_and_healthy, &poll(1, 10), &CancellationToken::new(), 4)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].resource, "Provider/a");
    }

    /// Same shape as an `#[async_trait]` method body: boxed, `Send`, borrowing
    /// its arguments.
    fn boxed_fan_out<'a>(
        client: &'a dyn ResourceClient,
        targets: &'a [ResourceRef],
        config: &'a PollConfig,
        cancel: &'a CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<HealthSnapshot>, ConvergenceError>> + Send + 'a>>
    {
        Box::pin(async move { wait_all_healthy(client, targets, &installed_and_healthy, config, cancel, 2).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_future_is_send() {
        let mock = MockResourceClient::new();
        let targets = vec![provider("a")];
        healthy_after(&mock, &targets[0], 0);

        let snapshots = boxed_fan_out(&mock, &targets, &poll(1, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_shorter_than_interval_times_out_at_deadline() {
        let mock = MockResourceClient::new();
        let target = provider("p");
        mock.script_conditions(&target, vec![unhealthy()]);

        let started = Instant::now();
        let err = wait_until_healthy(&mock, &target, &installed_and_healthy, &poll(10, 3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergenceError::TimedOut { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4), "{:?}", elapsed);
    }

    /// Holds every `conditions` call open for a second and records the
    /// peak number in flight.
    struct SlowClient {
        inner: MockResourceClient,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ResourceClient for SlowClient {
        async fn get(&self, target: &ResourceRef) -> Result<serde_json::Value, ResourceError> {
            self.inner.get(target).await
        }

        async fn list(
            &self,
            kind: &cluster_client::ResourceKind,
            namespace: Option<&str>,
        ) -> Result<Vec<serde_json::Value>, ResourceError> {
            self.inner.list(kind, namespace).await
        }

        async fn create(&self, target: &ResourceRef, object: &serde_json::Value) -> Result<serde_json::Value, ResourceError> {
            self.inner.create(target, object).await
        }

        async fn update(&self, target: &ResourceRef, object: &serde_json::Value) -> Result<serde_json::Value, ResourceError> {
            self.inner.update(target, object).await
        }

        async fn delete(&self, target: &ResourceRef) -> Result<(), ResourceError> {
            self.inner.delete(target).await
        }

        async fn conditions(&self, target: &ResourceRef) -> Result<Vec<Condition>, ResourceError> {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.conditions(target).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_never_exceeds_max_concurrency() {
        let client = SlowClient {
            inner: MockResourceClient::new(),
            in_flight: Default::default(),
            peak: Default::default(),
        };
        let targets: Vec<_> = (0..6).map(|i| provider(&format!("p{}", i))).collect();
        for target in &targets {
            healthy_after(&client.inner, target, 1);
        }

        let snapshots = wait_all_healthy(&client, &targets, &installed_and_healthy, &poll(1, 60), &CancellationToken::new(), 2)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 6);
        assert_eq!(client.peak.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_condition_true_checks_named_type() {
        let established = condition_true("Established");
        let snapshot = HealthSnapshot::from_conditions(
            "CustomResourceDefinition/providers.pkg.crossplane.io",
            vec![Condition::new("Established", ConditionStatus::True)],
        );
        assert!(established(&snapshot));
        assert!(!installed_and_healthy(&snapshot));
    }
}
