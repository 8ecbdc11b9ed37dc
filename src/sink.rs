//! Report delivery.
//!
//! Delivery is best effort: a failing sink is retried and then logged, and
//! never changes the selection that was made.

use anyhow::{Context, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::report::{SelectionReport, REPORT_FILE_NAME};

pub trait ReportSink {
    fn name(&self) -> String;

    fn deliver(&mut self, report: &SelectionReport) -> Result<()>;
}

/// Writes the report as pretty JSON.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `report.json` inside `out_dir`.
    pub fn in_dir(out_dir: &Path) -> Self {
        Self::new(out_dir.join(REPORT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn deliver(&mut self, report: &SelectionReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = report.to_json()?;
        std::fs::write(&self.path, json).with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }
}

/// POSTs the report JSON to an HTTP endpoint.
#[cfg(feature = "sink-http")]
pub struct HttpSink {
    url: url::Url,
    timeout: Duration,
}

#[cfg(feature = "sink-http")]
impl HttpSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| crate::EngineError::input(format!("invalid report url {endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(crate::EngineError::input(format!(
                "report url must be http or https, got {}",
                url.scheme()
            ))
            .into());
        }
        Ok(Self { url, timeout })
    }
}

#[cfg(feature = "sink-http")]
impl ReportSink for HttpSink {
    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    fn deliver(&mut self, report: &SelectionReport) -> Result<()> {
        let body = report.to_json()?;
        ureq::post(self.url.as_str())
            .timeout(self.timeout)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("post report to {}", self.url))?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Exponential backoff before retry `attempt` (1-based), plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Hand the report to every sink. Returns how many accepted it.
pub fn deliver_best_effort(
    sinks: &mut [Box<dyn ReportSink>],
    report: &SelectionReport,
    policy: RetryPolicy,
) -> usize {
    let mut delivered = 0;
    for sink in sinks.iter_mut() {
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            match sink.deliver(report) {
                Ok(()) => {
                    log::info!("report delivered to {}", sink.name());
                    delivered += 1;
                    break;
                }
                Err(err) if attempt < attempts => {
                    let delay = policy.delay(attempt);
                    log::warn!(
                        "report delivery to {} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        sink.name(),
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    log::error!("report delivery to {} gave up: {:#}", sink.name(), err);
                }
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FlakySink {
        failures_left: u32,
    }

    impl ReportSink for FlakySink {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn deliver(&mut self, _report: &SelectionReport) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(anyhow!("endpoint unreachable"));
            }
            Ok(())
        }
    }

    fn quick_retries(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn json_sink_writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonFileSink::in_dir(&dir.path().join("nested"));
        sink.deliver(&SelectionReport::not_found()).unwrap();
        let text = std::fs::read_to_string(sink.path()).unwrap();
        let parsed: SelectionReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, SelectionReport::not_found());
    }

    #[test]
    fn retries_until_success() {
        let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(FlakySink {
            failures_left: 2,
        })];
        let delivered = deliver_best_effort(&mut sinks, &SelectionReport::not_found(), quick_retries(3));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn exhausted_retries_do_not_error() {
        let mut sinks: Vec<Box<dyn ReportSink>> = vec![
            Box::new(FlakySink {
                failures_left: 10,
            }),
            Box::new(FlakySink {
                failures_left: 0,
            }),
        ];
        let delivered = deliver_best_effort(&mut sinks, &SelectionReport::not_found(), quick_retries(2));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn backoff_doubles_and_jitter_is_bounded() {
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(20),
        };
        for _ in 0..20 {
            let third = policy.delay(3);
            assert!(third >= Duration::from_millis(400));
            assert!(third <= Duration::from_millis(420));
        }
        assert_eq!(quick_retries(1).delay(1), Duration::ZERO);
    }

    #[cfg(feature = "sink-http")]
    #[test]
    fn http_sink_rejects_non_http_urls() {
        assert!(HttpSink::new("ftp://example.com/reports", Duration::from_secs(1)).is_err());
        assert!(HttpSink::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpSink::new("https://example.com/reports", Duration::from_secs(1)).is_ok());
    }
}
