use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sandbox::ContainerRuntime;
use tracing::{debug, error, info, warn};

use crate::admission::RateLimiter;
use crate::error::CompileError;
use crate::executor::{self, ExecutorConfig};
use crate::history::{ExecutionRecord, HistorySink};
use crate::image::ImageCache;
use crate::policy;
use crate::script::Script;

/// Request-independent settings for [`CompileService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub base_image: String,
    pub toolchain_dir: PathBuf,
    pub max_code_chars: usize,
    pub executor: ExecutorConfig,
}

/// Outcome of one submission.
#[derive(Debug)]
pub struct Submission {
    /// Set once a sandbox was allocated.
    pub sandbox_id: Option<String>,
    pub output: String,
    pub result: Result<(), CompileError>,
}

impl Submission {
    fn rejected(err: CompileError) -> Self {
        Self {
            sandbox_id: None,
            output: String::new(),
            result: Err(err),
        }
    }
}

/// Application context shared by every request handler.
pub struct CompileService {
    limiter: Arc<RateLimiter>,
    images: ImageCache,
    runtime: Arc<dyn ContainerRuntime>,
    history: Arc<dyn HistorySink>,
    settings: ServiceSettings,
}

impl CompileService {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        limiter: Arc<RateLimiter>,
        history: Arc<dyn HistorySink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            limiter,
            images: ImageCache::new(Arc::clone(&runtime)),
            runtime,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Admit, compile and run `code` for `identity`.
    ///
    /// Every admitted submission is written to history; rate-limited ones
    /// are not.
    pub async fn submit(&self, code: &str, identity: &str) -> Submission {
        if !self.limiter.allow(identity) {
            info!(identity = %identity, "rate limit exceeded");
            return Submission::rejected(CompileError::RateLimited);
        }

        let submitted_at = Utc::now();
        let started = Instant::now();
        let submission = self.run(code).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &submission.result {
            Ok(()) => info!(
                identity = %identity,
                id = ?submission.sandbox_id,
                elapsed_ms,
                "submission completed"
            ),
            Err(e @ CompileError::TooLong { .. }) => {
                info!(identity = %identity, error = %e, "submission rejected");
            }
            Err(e @ CompileError::TimedOut { .. }) => warn!(
                identity = %identity,
                id = ?submission.sandbox_id,
                error = %e,
                "submission timed out"
            ),
            Err(e) => error!(
                identity = %identity,
                error = %e,
                retryable = e.is_retryable(),
                "submission failed"
            ),
        }

        let record = ExecutionRecord {
            sandbox_id: submission.sandbox_id.clone(),
            submitted_at,
            finished_at: Utc::now(),
            elapsed_ms,
            identity: identity.to_string(),
            code: code.to_string(),
            output: submission.output.clone(),
            error: submission
                .result
                .as_ref()
                .err()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };
        if let Err(e) = self.history.record(record).await {
            warn!(identity = %identity, error = %e, "history write failed");
        }

        submission
    }

    async fn run(&self, code: &str) -> Submission {
        let settings = &self.settings;
        let script = match Script::build(code, settings.max_code_chars) {
            Ok(script) => script,
            Err(e) => return Submission::rejected(e),
        };

        let toolchain = &settings.toolchain_dir;
        let is_dir = tokio::fs::metadata(toolchain)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            return Submission::rejected(CompileError::MissingToolchain {
                path: toolchain.clone(),
            });
        }

        let phase = Instant::now();
        let image = match self.images.ensure(&settings.base_image).await {
            Ok((image, cached)) => {
                debug!(
                    image = %image.reference,
                    cached,
                    elapsed_ms = phase.elapsed().as_millis() as u64,
                    "base image ready"
                );
                image
            }
            Err(e) => return Submission::rejected(CompileError::runtime("ensure image", e)),
        };

        let policy = policy::build(toolchain);
        let execution =
            executor::execute(&self.runtime, &settings.executor, &script, policy, image).await;
        Submission {
            sandbox_id: Some(execution.sandbox_id),
            output: execution.output,
            result: execution.result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeRuntime, Toolchain, fixture, fixture_with};

    #[tokio::test]
    async fn successful_submission_is_recorded() {
        let f = fixture();
        let submission = f.service.submit("main", "10.0.0.1").await;
        assert!(submission.result.is_ok());
        assert_eq!(submission.output, "ok\n");

        let records = f.history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "10.0.0.1");
        assert_eq!(records[0].sandbox_id, submission.sandbox_id);
        assert!(records[0].error.is_empty());
    }

    #[tokio::test]
    async fn code_over_the_ceiling_never_creates_a_sandbox() {
        let f = fixture();
        let submission = f.service.submit(&"x".repeat(5001), "10.0.0.1").await;
        assert!(matches!(
            submission.result,
            Err(CompileError::TooLong { limit: 5000 })
        ));
        assert!(submission.sandbox_id.is_none());
        assert_eq!(f.runtime.creates(), 0);
        assert_eq!(f.runtime.pulls(), 0);

        let records = f.history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error, "code exceeds 5000 character limit");
    }

    #[tokio::test]
    async fn rate_limited_requests_are_not_recorded() {
        let f = fixture_with(FakeRuntime::default(), 1, Toolchain::Dir);
        assert!(f.service.submit("main", "10.0.0.1").await.result.is_ok());
        let second = f.service.submit("main", "10.0.0.1").await;
        assert!(matches!(second.result, Err(CompileError::RateLimited)));
        assert_eq!(f.runtime.creates(), 1);
        assert_eq!(f.history.records().len(), 1);
    }

    #[tokio::test]
    async fn missing_toolchain_is_reported_before_allocation() {
        let f = fixture_with(FakeRuntime::default(), 80, Toolchain::Missing);
        let submission = f.service.submit("main", "10.0.0.1").await;
        assert!(matches!(
            submission.result,
            Err(CompileError::MissingToolchain { .. })
        ));
        assert_eq!(f.runtime.pulls(), 0);
        assert_eq!(f.runtime.creates(), 0);
    }

    #[tokio::test]
    async fn toolchain_path_must_be_a_directory() {
        let f = fixture_with(FakeRuntime::default(), 80, Toolchain::File);
        let submission = f.service.submit("main", "10.0.0.1").await;
        let Err(CompileError::MissingToolchain { path }) = submission.result else {
            panic!("expected a missing toolchain, got {:?}", submission.result);
        };
        assert!(path.ends_with("toolchain.tar"));
        assert_eq!(f.runtime.creates(), 0);
    }

    #[tokio::test]
    async fn image_failure_carries_the_phase() {
        let runtime = FakeRuntime::default().with_failing_pulls(1);
        let f = fixture_with(runtime, 80, Toolchain::Dir);
        let submission = f.service.submit("main", "10.0.0.1").await;
        let Err(CompileError::RuntimeUnavailable { phase, .. }) = submission.result else {
            panic!("expected a runtime error, got {:?}", submission.result);
        };
        assert_eq!(phase, "ensure image");
        assert_eq!(f.runtime.creates(), 0);

        // The next request retries the pull.
        assert!(f.service.submit("main", "10.0.0.1").await.result.is_ok());
        assert_eq!(f.runtime.pulls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_share_one_pull() {
        let f = fixture_with(
            FakeRuntime::default().with_pull_delay(Duration::from_millis(500)),
            80,
            Toolchain::Dir,
        );
        let a = tokio::spawn({
            let service = Arc::clone(&f.service);
            async move { service.submit("main", "10.0.0.1").await }
        });
        let b = tokio::spawn({
            let service = Arc::clone(&f.service);
            async move { service.submit("main", "10.0.0.2").await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a.result.is_ok() && b.result.is_ok());
        assert_ne!(a.sandbox_id, b.sandbox_id);
        assert_eq!(f.runtime.pulls(), 1);
        assert_eq!(f.runtime.creates(), 2);
    }
}
