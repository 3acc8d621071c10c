use crate::alarm::AlarmSpec;
use crate::backend::AlarmBackend;
use crate::directory::EnvironmentDirectory;
use crate::templates::{AlarmKind, InvalidSettings, Settings};

/// Error of a provisioning pass. Alarms upserted before the failure are
/// left in place.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid alarm settings")]
    Settings(#[source] InvalidSettings),
    #[error("failed to enumerate environments")]
    Enumerate(#[source] anyhow::Error),
    #[error(
        "failed to upsert alarm {alarm} of environment {environment} \
         (after {completed} successful upserts)"
    )]
    Submit {
        environment: String,
        alarm: String,
        completed: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of a successful provisioning pass.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Report {
    /// Environments, as enumerated.
    pub environments: Vec<String>,
    /// Names of upserted alarms, in submission order.
    pub alarms: Vec<String>,
}

/// Provisioner upserts every alarm template for every environment of a
/// directory, one at a time and in order.
#[derive(Debug)]
pub struct Provisioner<D, B> {
    directory: D,
    backend: B,
    settings: Settings,
}

impl<D: EnvironmentDirectory, B: AlarmBackend> Provisioner<D, B> {
    pub fn new(directory: D, backend: B, settings: Settings) -> Self {
        Self {
            directory,
            backend,
            settings,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Enumerate environments and upsert their alarms. The first failure
    /// aborts the pass: no later template or environment is attempted.
    pub async fn provision(&self) -> Result<Report, Error> {
        self.settings.validate().map_err(Error::Settings)?;

        let environments = self
            .directory
            .list_environments()
            .await
            .map_err(Error::Enumerate)?;

        tracing::info!(
            count = environments.len(),
            environments = %serde_json::to_string_pretty(&environments).unwrap_or_default(),
            "Airflow environments"
        );

        let mut alarms = Vec::with_capacity(environments.len() * AlarmKind::ALL.len());

        for environment in &environments {
            for kind in AlarmKind::ALL {
                let spec = kind.render(environment, &self.settings);
                tracing::info!(%environment, alarm = %spec.name, "creating alarm");

                if let Err(source) = self.submit(&spec).await {
                    return Err(Error::Submit {
                        environment: environment.clone(),
                        alarm: spec.name,
                        completed: alarms.len(),
                        source,
                    });
                }
                alarms.push(spec.name);
            }
        }

        Ok(Report {
            environments,
            alarms,
        })
    }

    async fn submit(&self, spec: &AlarmSpec) -> anyhow::Result<()> {
        spec.validate()?;
        self.backend.put_alarm(spec).await
    }
}
