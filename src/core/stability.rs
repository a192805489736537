use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Anything that can report a fingerprint of its current state.
///
/// Two equal fingerprints mean "nothing observable changed between the two
/// samples". The detector never looks inside them.
#[async_trait]
pub trait FingerprintSource: Send {
    async fn sample(&mut self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityPolicy {
    pub poll_interval: Duration,
    /// Consecutive matching samples required before the state counts as settled.
    pub stable_threshold: u32,
    pub max_wait: Duration,
    /// Extra pause applied once polling ends, whether or not it converged.
    pub settle_delay: Duration,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            stable_threshold: 3,
            max_wait: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StabilityOutcome {
    Stable { samples: u32, elapsed: Duration },
    TimedOut { samples: u32, elapsed: Duration },
}

impl StabilityOutcome {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityOutcome::Stable { .. })
    }

    pub fn samples(&self) -> u32 {
        match self {
            StabilityOutcome::Stable { samples, .. } | StabilityOutcome::TimedOut { samples, .. } => {
                *samples
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StabilityDetector {
    policy: StabilityPolicy,
}

impl StabilityDetector {
    pub fn new(policy: StabilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StabilityPolicy {
        &self.policy
    }

    /// Polls `source` until `stable_threshold` consecutive samples match or the
    /// wait budget runs out. Best effort: sampler failures count as change and
    /// the caller always gets an outcome back.
    pub async fn wait_until_stable<S>(&self, source: &mut S, initial: Option<String>) -> StabilityOutcome
    where
        S: FingerprintSource + ?Sized,
    {
        let started = Instant::now();
        let mut failures: u64 = 0;
        let mut last = match initial {
            Some(fp) => fp,
            None => sample_or_marker(source, &mut failures).await,
        };
        let mut matches = 0u32;
        let mut samples = 0u32;

        while started.elapsed() < self.policy.max_wait {
            tokio::time::sleep(self.policy.poll_interval).await;
            let current = sample_or_marker(source, &mut failures).await;
            samples += 1;

            if current == last {
                matches += 1;
                if matches >= self.policy.stable_threshold {
                    tokio::time::sleep(self.policy.settle_delay).await;
                    return StabilityOutcome::Stable {
                        samples,
                        elapsed: started.elapsed(),
                    };
                }
            } else {
                matches = 0;
                last = current;
            }
        }

        debug!(
            "Page did not settle within {:?} ({} samples), continuing anyway",
            self.policy.max_wait, samples
        );
        tokio::time::sleep(self.policy.settle_delay).await;
        StabilityOutcome::TimedOut {
            samples,
            elapsed: started.elapsed(),
        }
    }
}

// A failed sample must never equal any other sample, including a later failure.
async fn sample_or_marker<S>(source: &mut S, failures: &mut u64) -> String
where
    S: FingerprintSource + ?Sized,
{
    match source.sample().await {
        Ok(fp) => fp,
        Err(e) => {
            *failures += 1;
            debug!("Fingerprint sample failed: {}", e);
            format!("\u{0}sample-error:{}:{}", failures, uuid::Uuid::new_v4())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        samples: VecDeque<Result<String>>,
        fallback: Option<String>,
        calls: u32,
    }

    impl Scripted {
        fn constant(fp: &str) -> Self {
            Self {
                samples: VecDeque::new(),
                fallback: Some(fp.to_string()),
                calls: 0,
            }
        }

        fn sequence(items: Vec<Result<String>>, fallback: Option<&str>) -> Self {
            Self {
                samples: items.into(),
                fallback: fallback.map(str::to_string),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl FingerprintSource for Scripted {
        async fn sample(&mut self) -> Result<String> {
            self.calls += 1;
            if let Some(next) = self.samples.pop_front() {
                return next;
            }
            match &self.fallback {
                Some(fp) => Ok(fp.clone()),
                None => Ok(format!("changing-{}", self.calls)),
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl FingerprintSource for AlwaysFails {
        async fn sample(&mut self) -> Result<String> {
            Err(anyhow::anyhow!("execution context was destroyed"))
        }
    }

    fn fast_policy() -> StabilityPolicy {
        StabilityPolicy {
            poll_interval: Duration::from_millis(200),
            stable_threshold: 3,
            max_wait: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn constant_page_settles_after_threshold_polls() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = Scripted::constant("abc");

        let outcome = detector.wait_until_stable(&mut source, None).await;

        assert!(outcome.is_stable());
        assert_eq!(outcome.samples(), 3);
        // one baseline sample plus three polls
        assert_eq!(source.calls, 4);
        if let StabilityOutcome::Stable { elapsed, .. } = outcome {
            assert!(elapsed >= Duration::from_millis(2600));
            assert!(elapsed < Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fingerprint_skips_baseline_sample() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = Scripted::constant("abc");

        let outcome = detector
            .wait_until_stable(&mut source, Some("abc".to_string()))
            .await;

        assert!(outcome.is_stable());
        assert_eq!(source.calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_initial_fingerprint_needs_a_fresh_run_of_matches() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = Scripted::constant("after-click");

        let outcome = detector
            .wait_until_stable(&mut source, Some("before-click".to_string()))
            .await;

        assert!(outcome.is_stable());
        // first poll differs from the initial value, then three matches
        assert_eq!(outcome.samples(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn ever_changing_page_times_out_within_budget() {
        let policy = fast_policy();
        let detector = StabilityDetector::new(policy.clone());
        let mut source = Scripted::sequence(Vec::new(), None);

        let outcome = detector.wait_until_stable(&mut source, None).await;

        match outcome {
            StabilityOutcome::TimedOut { samples, elapsed } => {
                assert!((24..=25).contains(&samples));
                assert!(elapsed >= policy.max_wait);
                assert!(elapsed <= policy.max_wait + policy.poll_interval + policy.settle_delay);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn match_streak_resets_on_change() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = Scripted::sequence(
            vec![
                Ok("a".to_string()),
                Ok("a".to_string()),
                Ok("a".to_string()),
                Ok("b".to_string()),
            ],
            Some("b"),
        );

        let outcome = detector.wait_until_stable(&mut source, None).await;

        assert!(outcome.is_stable());
        // a,a (2 matches) -> b resets -> b,b,b
        assert_eq!(outcome.samples(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_errors_are_treated_as_unstable() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = AlwaysFails;

        let outcome = detector.wait_until_stable(&mut source, None).await;

        assert!(!outcome.is_stable());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_breaks_streak_then_recovers() {
        let detector = StabilityDetector::new(fast_policy());
        let mut source = Scripted::sequence(
            vec![
                Ok("x".to_string()),
                Ok("x".to_string()),
                Err(anyhow::anyhow!("navigating")),
            ],
            Some("x"),
        );

        let outcome = detector.wait_until_stable(&mut source, None).await;

        assert!(outcome.is_stable());
        // x (1 match), err (reset), x (reset, differs from marker), x, x, x
        assert_eq!(outcome.samples(), 6);
    }
}
