use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::dump::partition::TimeRange;
use crate::dump::DumpOptions;
use crate::error::{PromError, PromResult};
use crate::http::{QuerySource, SampleStream, Warned};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Three hours at one-second resolution: a single range per query.
pub fn options() -> DumpOptions {
    DumpOptions {
        endpoint: "http://prometheus:9090".to_string(),
        start: t0(),
        end: t0() + Duration::hours(3),
        step: Duration::seconds(1),
        query: None,
        metric_names: Vec::new(),
        gzip: false,
        memory_ratio: 1.0,
        query_interval: std::time::Duration::ZERO,
    }
}

/// In-memory query source. Every range query answers with one series named
/// after the query, holding a single sample at the range start.
#[derive(Default)]
pub struct FakeSource {
    names: Vec<String>,
    label_warnings: Vec<String>,
    fail_on_call: Option<usize>,
    warn_on_call: Option<usize>,
    cancel_on_call: Option<(usize, CancellationToken)>,
    label_calls: AtomicUsize,
    calls: Mutex<Vec<(String, TimeRange)>>,
}

impl FakeSource {
    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_label_warnings(mut self, warnings: &[&str]) -> Self {
        self.label_warnings = warnings.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Zero-based index of the range query that errors.
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn warning_on(mut self, call: usize) -> Self {
        self.warn_on_call = Some(call);
        self
    }

    /// Cancels `token` from inside the given call, then never answers it.
    pub fn cancelling_on(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_on_call = Some((call, token));
        self
    }

    pub fn label_calls(&self) -> usize {
        self.label_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, TimeRange)> {
        self.calls.lock().unwrap().clone()
    }
}

impl QuerySource for FakeSource {
    async fn query_range(
        &self,
        query: &str,
        range: TimeRange,
        _step: Duration,
    ) -> PromResult<Warned<Vec<SampleStream>>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((query.to_string(), range));
            calls.len() - 1
        };

        if let Some((at, token)) = &self.cancel_on_call {
            if *at == call {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        if self.fail_on_call == Some(call) {
            return Err(PromError::UpstreamQuery(format!("query {query} failed")));
        }

        let series = vec![SampleStream {
            metric: BTreeMap::from([("__name__".to_string(), query.to_string())]),
            values: vec![(range.start.timestamp() as f64, "1".to_string())],
        }];
        let warnings = if self.warn_on_call == Some(call) {
            vec!["partial response".to_string()]
        } else {
            Vec::new()
        };
        Ok(Warned {
            data: series,
            warnings,
        })
    }

    async fn label_values(
        &self,
        _label: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> PromResult<Warned<Vec<String>>> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Warned {
            data: self.names.clone(),
            warnings: self.label_warnings.clone(),
        })
    }
}
