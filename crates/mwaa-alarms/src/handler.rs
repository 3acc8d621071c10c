use crate::backend::AlarmBackend;
use crate::directory::EnvironmentDirectory;
use crate::metrics::Metrics;
use crate::provision::{Provisioner, Report};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Instrument;

/// Metadata of the invocation being handled, used only for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    pub function_arn: Option<String>,
    pub trace_id: Option<String>,
}

impl InvocationContext {
    /// Context of an invocation made outside of the Lambda runtime.
    pub fn local() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            function_arn: None,
            trace_id: None,
        }
    }

    /// Name of the invoked function, taken from its ARN
    /// `arn:aws:lambda:{region}:{account}:function:{name}[:{qualifier}]`.
    pub fn function_name(&self) -> Option<&str> {
        self.function_arn.as_deref()?.split(':').nth(6)
    }
}

impl From<&lambda_runtime::Context> for InvocationContext {
    fn from(context: &lambda_runtime::Context) -> Self {
        Self {
            request_id: context.request_id.clone(),
            function_arn: Some(context.invoked_function_arn.clone()),
            trace_id: context.xray_trace_id.clone(),
        }
    }
}

/// Handler processes one invocation. The event is an arbitrary JSON value.
pub trait Handler: Send + Sync + 'static {
    fn handle<'s>(
        &'s self,
        event: serde_json::Value,
        context: &'s InvocationContext,
    ) -> impl std::future::Future<Output = anyhow::Result<Report>> + Send + 's;
}

impl<D: EnvironmentDirectory, B: AlarmBackend> Handler for Provisioner<D, B> {
    async fn handle<'s>(
        &'s self,
        _event: serde_json::Value,
        _context: &'s InvocationContext,
    ) -> anyhow::Result<Report> {
        Ok(self.provision().await?)
    }
}

/// Instrumented wraps a Handler with an invocation span, logging of the
/// received event and of the invocation's outcome. The first invocation
/// also records a `ColdStart` metric.
pub struct Instrumented<H> {
    inner: H,
    metrics: Metrics,
    cold_start: AtomicBool,
}

impl<H: Handler> Instrumented<H> {
    pub fn new(inner: H, metrics: Metrics) -> Self {
        Self {
            inner,
            metrics,
            cold_start: AtomicBool::new(true),
        }
    }
}

impl<H: Handler> Handler for Instrumented<H> {
    async fn handle<'s>(
        &'s self,
        event: serde_json::Value,
        context: &'s InvocationContext,
    ) -> anyhow::Result<Report> {
        // Only the first invocation of a process pays for its initialization.
        let cold_start = self.cold_start.swap(false, Ordering::Relaxed);

        let span = tracing::info_span!(
            "invocation",
            request_id = %context.request_id,
            function_arn = context.function_arn.as_deref(),
            trace_id = context.trace_id.as_deref(),
            cold_start
        );

        async move {
            if cold_start {
                if let Err(error) = self.metrics.cold_start(context.function_name()) {
                    tracing::warn!(error = %format!("{error:#}"), "failed to record cold start");
                }
            }
            tracing::info!(
                event = %serde_json::to_string_pretty(&event).unwrap_or_default(),
                "received event"
            );
            let started = std::time::Instant::now();
            let result = self.inner.handle(event, context).await;

            match &result {
                Ok(report) => tracing::info!(
                    elapsed = ?started.elapsed(),
                    environments = report.environments.len(),
                    alarms = report.alarms.len(),
                    "invocation completed"
                ),
                Err(error) => tracing::error!(
                    elapsed = ?started.elapsed(),
                    error = %format!("{error:#}"),
                    "invocation failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Serve invocations from the Lambda runtime API until the runtime exits.
pub async fn serve<H: Handler>(handler: H) -> anyhow::Result<()> {
    let handler = Arc::new(handler);

    lambda_runtime::run(lambda_runtime::service_fn(
        move |event: lambda_runtime::LambdaEvent<serde_json::Value>| {
            let handler = handler.clone();
            async move {
                let (payload, context) = event.into_parts();
                let context = InvocationContext::from(&context);

                handler
                    .handle(payload, &context)
                    .await
                    .map_err(lambda_runtime::Error::from)
            }
        },
    ))
    .await
    .map_err(|err| anyhow::anyhow!(err))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::test_support::SharedBuffer;
    use crate::metrics::MetricsArgs;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Handler for Counting {
        async fn handle<'s>(
            &'s self,
            event: serde_json::Value,
            _context: &'s InvocationContext,
        ) -> anyhow::Result<Report> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(Report {
                environments: vec![event["environment"]
                    .as_str()
                    .unwrap_or("none")
                    .to_string()],
                alarms: Vec::new(),
            })
        }
    }

    fn context(request_id: &str) -> InvocationContext {
        InvocationContext {
            request_id: request_id.to_string(),
            function_arn: Some(
                "arn:aws:lambda:us-east-1:000000000000:function:alarms".to_string(),
            ),
            trace_id: None,
        }
    }

    fn instrumented(inner: Counting) -> (Instrumented<Counting>, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let metrics = Metrics::to_writer(MetricsArgs::default(), buffer.clone());
        (Instrumented::new(inner, metrics), buffer)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_instrumented_passes_through_and_tracks_cold_start() {
        let (handler, _) = instrumented(Counting::default());

        let report = handler
            .handle(serde_json::json!({"environment": "dev"}), &context("req-1"))
            .await
            .unwrap();
        assert_eq!(report.environments, vec!["dev"]);
        assert!(logs_contain("cold_start=true"));
        assert!(logs_contain("received event"));
        assert!(logs_contain("invocation completed"));

        handler
            .handle(serde_json::Value::Null, &context("req-2"))
            .await
            .unwrap();
        assert!(logs_contain("cold_start=false"));
        assert_eq!(handler.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_instrumented_propagates_failures() {
        let (handler, metrics) = instrumented(Counting {
            fail: true,
            ..Default::default()
        });

        let err = handler
            .handle(serde_json::json!({}), &context("req-1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backend unavailable");
        assert!(logs_contain("invocation failed"));
        // A failed invocation still started the process cold.
        assert_eq!(metrics.records().len(), 1);
    }

    #[tokio::test]
    async fn test_cold_start_is_recorded_once() {
        let (handler, metrics) = instrumented(Counting::default());

        for request_id in ["req-1", "req-2"] {
            handler
                .handle(serde_json::json!({}), &context(request_id))
                .await
                .unwrap();
        }

        let records = metrics.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["ColdStart"], 1);
        assert_eq!(records[0]["function_name"], "alarms");
        assert_eq!(records[0]["service"], "mwaa-alarms");
        assert_eq!(
            records[0]["_aws"]["CloudWatchMetrics"][0]["Namespace"],
            "MWAAAlarms"
        );
    }

    #[test]
    fn test_local_contexts_are_distinct() {
        let (one, two) = (InvocationContext::local(), InvocationContext::local());
        assert_ne!(one.request_id, two.request_id);
        assert_eq!(one.function_arn, None);
        assert_eq!(one.function_name(), None);

        let mut qualified = context("req-1");
        assert_eq!(qualified.function_name(), Some("alarms"));
        qualified.function_arn =
            Some("arn:aws:lambda:us-east-1:000000000000:function:alarms:live".to_string());
        assert_eq!(qualified.function_name(), Some("alarms"));
    }
}
