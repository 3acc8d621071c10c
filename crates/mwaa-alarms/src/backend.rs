use crate::alarm::{
    AlarmSpec, Comparison, Dimension, MetricDefinition, MetricQuery, MetricStat, QuerySource,
    Statistic, Tag,
};
use aws_sdk_cloudwatch::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudwatch::operation::put_metric_alarm::builders::PutMetricAlarmInputBuilder;
use aws_sdk_cloudwatch::operation::put_metric_alarm::PutMetricAlarmInput;
use aws_sdk_cloudwatch::types;

/// AlarmBackend creates or updates alarms, keyed by alarm name.
pub trait AlarmBackend: std::fmt::Debug + Send + Sync + 'static {
    fn put_alarm<'s>(
        &'s self,
        spec: &'s AlarmSpec,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;
}

#[derive(Debug)]
pub enum Backend {
    /// Log rendered alarms instead of submitting them.
    DryRun,
    CloudWatch(CloudWatchBackend),
}

impl Backend {
    pub fn cloudwatch(client: aws_sdk_cloudwatch::Client) -> Backend {
        Backend::CloudWatch(CloudWatchBackend { client })
    }
}

impl AlarmBackend for Backend {
    async fn put_alarm<'s>(&'s self, spec: &'s AlarmSpec) -> anyhow::Result<()> {
        match self {
            Backend::DryRun => {
                tracing::info!(
                    alarm = %serde_json::to_string(spec)?,
                    "skipping put metric alarm (dry run)"
                );
                Ok(())
            }
            Backend::CloudWatch(cloudwatch) => cloudwatch.put_alarm(spec).await,
        }
    }
}

/// Upserts alarms through the CloudWatch `PutMetricAlarm` API.
#[derive(Debug)]
pub struct CloudWatchBackend {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchBackend {
    async fn put_alarm(&self, spec: &AlarmSpec) -> anyhow::Result<()> {
        let request = put_metric_alarm_input(spec)?;

        if let Err(err) = request.send_with(&self.client).await {
            anyhow::bail!(
                "failed to put metric alarm {} ({})",
                spec.name,
                describe_sdk_error(&err)
            );
        }
        tracing::debug!(alarm = %spec.name, "put metric alarm");

        Ok(())
    }
}

/// Map a spec onto the `PutMetricAlarm` request which upserts it.
pub(crate) fn put_metric_alarm_input(
    spec: &AlarmSpec,
) -> anyhow::Result<PutMetricAlarmInputBuilder> {
    let tags = spec
        .tags
        .iter()
        .map(sdk_tag)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let request = PutMetricAlarmInput::builder()
        .alarm_name(&spec.name)
        .alarm_description(&spec.description)
        .comparison_operator(sdk_comparison(spec.comparison))
        .evaluation_periods(spec.evaluation_periods)
        .datapoints_to_alarm(spec.datapoints_to_alarm)
        .threshold(spec.threshold)
        .treat_missing_data(spec.treat_missing_data.as_str())
        .actions_enabled(spec.actions_enabled)
        .set_alarm_actions(Some(spec.alarm_actions.clone()))
        .set_insufficient_data_actions(spec.insufficient_data_actions.clone())
        .set_tags(Some(tags));

    Ok(match &spec.metric {
        MetricDefinition::Metric(stat) => request
            .namespace(&stat.namespace)
            .metric_name(&stat.metric_name)
            .statistic(sdk_statistic(stat.stat))
            .period(stat.period)
            .set_dimensions(Some(sdk_dimensions(&stat.dimensions)?)),
        MetricDefinition::Queries(queries) => request.set_metrics(Some(
            queries
                .iter()
                .map(sdk_query)
                .collect::<anyhow::Result<Vec<_>>>()?,
        )),
    })
}

/// Render an AWS SDK error with the service's error code and message when
/// the service returned one, or the full error chain otherwise.
pub(crate) fn describe_sdk_error<E>(err: &E) -> String
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some(code) => format!("{code}: {}", err.message().unwrap_or_default()),
        None => DisplayErrorContext(err).to_string(),
    }
}

fn sdk_comparison(comparison: Comparison) -> types::ComparisonOperator {
    match comparison {
        Comparison::GreaterThanThreshold => types::ComparisonOperator::GreaterThanThreshold,
        Comparison::LessThanOrEqualToThreshold => {
            types::ComparisonOperator::LessThanOrEqualToThreshold
        }
    }
}

fn sdk_statistic(stat: Statistic) -> types::Statistic {
    match stat {
        Statistic::Average => types::Statistic::Average,
        Statistic::Maximum => types::Statistic::Maximum,
    }
}

fn sdk_tag(tag: &Tag) -> anyhow::Result<types::Tag> {
    Ok(types::Tag::builder()
        .key(&tag.key)
        .value(&tag.value)
        .build())
}

fn sdk_dimensions(dimensions: &[Dimension]) -> anyhow::Result<Vec<types::Dimension>> {
    dimensions
        .iter()
        .map(|dimension| {
            Ok(types::Dimension::builder()
                .name(&dimension.name)
                .value(&dimension.value)
                .build())
        })
        .collect()
}

fn sdk_metric_stat(stat: &MetricStat) -> anyhow::Result<types::MetricStat> {
    let metric = types::Metric::builder()
        .namespace(&stat.namespace)
        .metric_name(&stat.metric_name)
        .set_dimensions(Some(sdk_dimensions(&stat.dimensions)?))
        .build();

    Ok(types::MetricStat::builder()
        .metric(metric)
        .period(stat.period)
        .stat(stat.stat.as_str())
        .build())
}

fn sdk_query(query: &MetricQuery) -> anyhow::Result<types::MetricDataQuery> {
    let builder = types::MetricDataQuery::builder()
        .id(&query.id)
        .set_label(query.label.clone())
        .return_data(query.return_data);

    let builder = match &query.source {
        QuerySource::Stat(stat) => builder.metric_stat(sdk_metric_stat(stat)?),
        QuerySource::Expression(expr) => builder.expression(expr.to_string()),
    };

    Ok(builder.build())
}
