use tokio_util::sync::CancellationToken;

use crate::dump::DumpOptions;
use crate::error::{PromError, PromResult};
use crate::http::QuerySource;

const METRIC_NAME_LABEL: &str = "__name__";

/// Resolves the query strings a dump will execute, in execution order.
///
/// An explicit query wins over a metric-name list, which wins over
/// enumerating every metric name the source knows about in the window.
pub async fn select_queries(
    source: &impl QuerySource,
    opts: &DumpOptions,
    cancel: &CancellationToken,
) -> PromResult<Vec<String>> {
    if let Some(query) = opts.query.as_deref().filter(|q| !q.is_empty()) {
        return Ok(vec![query.to_string()]);
    }

    if !opts.metric_names.is_empty() {
        tracing::debug!(count = opts.metric_names.len(), "using explicit metric names");
        return Ok(opts
            .metric_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect());
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PromError::Cancelled),
        result = source.label_values(METRIC_NAME_LABEL, opts.start, opts.end) => result,
    };
    let names = result?.into_strict()?;
    tracing::debug!(count = names.len(), "enumerated metric names from source");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::testing::{options, FakeSource};

    #[tokio::test]
    async fn explicit_query_is_used_verbatim() {
        let source = FakeSource::default().with_names(&["ignored"]);
        let mut opts = options();
        opts.query = Some(" rate(http_requests_total[5m]) ".to_string());
        opts.metric_names = vec!["also_ignored".to_string()];

        let queries = select_queries(&source, &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(queries, vec![" rate(http_requests_total[5m]) "]);
        assert_eq!(source.label_calls(), 0);
    }

    #[tokio::test]
    async fn metric_names_are_trimmed_and_blanks_dropped() {
        let source = FakeSource::default();
        let mut opts = options();
        opts.metric_names = vec![
            " up ".to_string(),
            String::new(),
            "  ".to_string(),
            "go_goroutines\r".to_string(),
            "up".to_string(),
        ];

        let queries = select_queries(&source, &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(queries, vec!["up", "go_goroutines", "up"]);
        assert_eq!(source.label_calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_enumerating_names() {
        let source = FakeSource::default().with_names(&["b_metric", "a_metric"]);
        let queries = select_queries(&source, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(queries, vec!["b_metric", "a_metric"]);
        assert_eq!(source.label_calls(), 1);
    }

    #[tokio::test]
    async fn enumeration_warnings_are_fatal() {
        let source = FakeSource::default()
            .with_names(&["up"])
            .with_label_warnings(&["results truncated"]);
        let err = select_queries(&source, &options(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PromError::UpstreamWarning(_)));
    }

    #[tokio::test]
    async fn cancelled_before_enumeration() {
        let source = FakeSource::default().with_names(&["up"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = select_queries(&source, &options(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PromError::Cancelled));
    }
}
