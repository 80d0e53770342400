use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for a job or a connection. `security_id` and `client_id` are
/// filled in later through [`annotate_span`].
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        security_id = field::Empty,
        client_id = field::Empty
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        security_id = field::Empty,
        client_id = field::Empty
    )
}

pub fn annotate_span(security_id: Option<i64>, client_id: Option<&uuid::Uuid>) {
    let span = Span::current();
    if let Some(id) = security_id {
        span.record("security_id", field::display(id));
    }
    if let Some(cid) = client_id {
        span.record("client_id", field::display(cid));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warn_if_slow_passes_output_through() {
        let out = warn_if_slow("unit", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(out, 7);
    }
}
