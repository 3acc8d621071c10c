use mwaa_alarms::provision::Error;
use mwaa_alarms::templates::Settings;
use mwaa_alarms::{
    AlarmBackend, AlarmSpec, EnvironmentDirectory, Handler, Instrumented, InvocationContext,
    Metrics, MetricsArgs, Provisioner,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug)]
struct StaticDirectory(Vec<&'static str>);

impl EnvironmentDirectory for StaticDirectory {
    async fn list_environments<'s>(&'s self) -> anyhow::Result<Vec<String>> {
        Ok(self.0.iter().map(|env| env.to_string()).collect())
    }
}

/// An in-memory alarm store with upsert semantics, which records every call
/// and fails the call with the given index.
#[derive(Debug, Default)]
struct FakeCloudWatch {
    alarms: Mutex<BTreeMap<String, AlarmSpec>>,
    calls: Mutex<Vec<String>>,
    fail_call: Option<usize>,
}

impl AlarmBackend for FakeCloudWatch {
    async fn put_alarm<'s>(&'s self, spec: &'s AlarmSpec) -> anyhow::Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(spec.name.clone());

        if self.fail_call == Some(calls.len() - 1) {
            anyhow::bail!(
                "failed to put metric alarm {} (Throttling: Rate exceeded)",
                spec.name
            );
        }
        self.alarms
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }
}

fn provisioner(
    environments: Vec<&'static str>,
    backend: FakeCloudWatch,
) -> Provisioner<StaticDirectory, FakeCloudWatch> {
    Provisioner::new(StaticDirectory(environments), backend, Settings::default())
}

#[tokio::test]
async fn test_no_environments_makes_no_calls() {
    let provisioner = provisioner(Vec::new(), FakeCloudWatch::default());
    let report = provisioner.provision().await.unwrap();

    assert!(report.environments.is_empty());
    assert!(report.alarms.is_empty());
    assert!(provisioner.backend().calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_alarms_are_upserted_in_environment_then_template_order() {
    let provisioner = provisioner(vec!["dev", "prod"], FakeCloudWatch::default());
    let report = provisioner.provision().await.unwrap();

    let expected = vec![
        "Airflow-dev-UnhealthyWorker",
        "Airflow-dev-HeartbeatFail",
        "Airflow-dev-TotalParseTime",
        "Airflow-prod-UnhealthyWorker",
        "Airflow-prod-HeartbeatFail",
        "Airflow-prod-TotalParseTime",
    ];
    assert_eq!(report.alarms, expected);
    assert_eq!(*provisioner.backend().calls.lock().unwrap(), expected);
    assert_eq!(report.environments, vec!["dev", "prod"]);
}

#[tokio::test]
async fn test_repeated_invocations_update_in_place() {
    let provisioner = provisioner(vec!["dev", "prod"], FakeCloudWatch::default());
    let context = InvocationContext::local();
    let handler = Instrumented::new(
        provisioner,
        Metrics::to_writer(MetricsArgs::default(), std::io::sink()),
    );

    let first = handler.handle(serde_json::json!({}), &context).await.unwrap();
    let second = handler.handle(serde_json::json!({}), &context).await.unwrap();
    assert_eq!(first, second);

    // Round-trip the report through JSON, as the Lambda runtime does.
    let encoded = serde_json::to_value(&second).unwrap();
    assert_eq!(
        serde_json::from_value::<mwaa_alarms::Report>(encoded).unwrap(),
        first
    );
}

#[tokio::test]
async fn test_second_invocation_leaves_definitions_unchanged() {
    let provisioner = provisioner(vec!["dev", "prod"], FakeCloudWatch::default());

    provisioner.provision().await.unwrap();
    let after_first = snapshot(provisioner.backend());
    provisioner.provision().await.unwrap();
    let after_second = snapshot(provisioner.backend());

    assert_eq!(after_first.len(), 6);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_failure_stops_all_later_submissions() {
    let backend = FakeCloudWatch {
        fail_call: Some(1),
        ..Default::default()
    };
    let provisioner = provisioner(vec!["dev", "prod"], backend);
    let err = provisioner.provision().await.unwrap_err();

    let Error::Submit {
        environment,
        alarm,
        completed,
        ..
    } = &err
    else {
        panic!("expected a submission error, got {err:?}");
    };
    assert_eq!(environment, "dev");
    assert_eq!(alarm, "Airflow-dev-HeartbeatFail");
    assert_eq!(*completed, 1);
    assert_eq!(
        format!("{:#}", anyhow::Error::from(err)),
        "failed to upsert alarm Airflow-dev-HeartbeatFail of environment dev \
         (after 1 successful upserts): \
         failed to put metric alarm Airflow-dev-HeartbeatFail (Throttling: Rate exceeded)"
    );

    let backend = provisioner.backend();
    assert_eq!(
        *backend.calls.lock().unwrap(),
        vec!["Airflow-dev-UnhealthyWorker", "Airflow-dev-HeartbeatFail"]
    );
    // The alarm upserted before the failure is not rolled back.
    assert_eq!(
        backend.alarms.lock().unwrap().keys().collect::<Vec<_>>(),
        vec!["Airflow-dev-UnhealthyWorker"]
    );
}

fn snapshot(backend: &FakeCloudWatch) -> BTreeMap<String, AlarmSpec> {
    backend.alarms.lock().unwrap().clone()
}
