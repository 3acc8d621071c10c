//! Metrics of the function itself, written to stdout in the CloudWatch
//! embedded metric format. Within Lambda, stdout is shipped to CloudWatch
//! Logs, which extracts the metrics from these records.
use std::io::Write;
use std::sync::Mutex;

pub const DEFAULT_NAMESPACE: &str = "MWAAAlarms";
pub const DEFAULT_SERVICE: &str = "mwaa-alarms";

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct MetricsArgs {
    /// CloudWatch namespace of metrics about the function itself.
    #[clap(
        long = "metrics.namespace",
        env = "METRICS_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        global = true
    )]
    pub namespace: String,
    /// Value of the `service` dimension of emitted metrics.
    #[clap(
        long = "metrics.service",
        env = "SERVICE_NAME",
        default_value = DEFAULT_SERVICE,
        global = true
    )]
    pub service: String,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

/// Metrics emits embedded metric format records, one JSON object per line.
pub struct Metrics {
    args: MetricsArgs,
    out: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("args", &self.args).finish()
    }
}

impl Metrics {
    pub fn stdout(args: MetricsArgs) -> Self {
        Self::to_writer(args, std::io::stdout())
    }

    pub fn to_writer(args: MetricsArgs, out: impl Write + Send + 'static) -> Self {
        Self {
            args,
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Record a cold start of the function. Without a function name, as
    /// when invoked outside of Lambda, only the `service` dimension is set.
    pub fn cold_start(&self, function_name: Option<&str>) -> anyhow::Result<()> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_millis() as u64;

        let mut dimensions = vec!["service"];
        let mut record = serde_json::json!({
            "service": self.args.service,
            "ColdStart": 1,
        });
        if let Some(function_name) = function_name {
            dimensions.insert(0, "function_name");
            record["function_name"] = function_name.into();
        }
        record["_aws"] = serde_json::json!({
            "Timestamp": timestamp,
            "CloudWatchMetrics": [{
                "Namespace": self.args.namespace,
                "Dimensions": [dimensions],
                "Metrics": [{"Name": "ColdStart", "Unit": "Count"}],
            }],
        });

        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics writer is poisoned"))?;
        serde_json::to_writer(&mut *out, &record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// A writer whose output remains readable after it's handed off.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        pub fn records(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            std::str::from_utf8(&buf)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }
}
