use crate::backend::describe_sdk_error;

/// EnvironmentDirectory enumerates the orchestration environments to
/// provision alarms for.
pub trait EnvironmentDirectory: std::fmt::Debug + Send + Sync + 'static {
    /// Names of all environments, in the order the service returns them.
    fn list_environments<'s>(
        &'s self,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<String>>> + Send + 's;
}

/// Lists environments through the MWAA `ListEnvironments` API.
#[derive(Debug)]
pub struct MwaaDirectory {
    client: aws_sdk_mwaa::Client,
    all_pages: bool,
}

impl MwaaDirectory {
    /// When `all_pages` is false only the first page of the listing is read,
    /// and environments beyond it are not provisioned.
    pub fn new(client: aws_sdk_mwaa::Client, all_pages: bool) -> Self {
        Self { client, all_pages }
    }
}

impl EnvironmentDirectory for MwaaDirectory {
    async fn list_environments<'s>(&'s self) -> anyhow::Result<Vec<String>> {
        if !self.all_pages {
            let output = match self.client.list_environments().send().await {
                Ok(output) => output,
                Err(err) => anyhow::bail!(
                    "failed to list MWAA environments ({})",
                    describe_sdk_error(&err)
                ),
            };
            return Ok(output.environments().to_vec());
        }

        let mut pages = self.client.list_environments().into_paginator().send();
        let mut environments = Vec::new();

        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => anyhow::bail!(
                    "failed to list MWAA environments after {} results ({})",
                    environments.len(),
                    describe_sdk_error(&err)
                ),
            };
            environments.extend(page.environments().iter().cloned());
        }
        tracing::debug!(count = environments.len(), "listed all pages of MWAA environments");

        Ok(environments)
    }
}
