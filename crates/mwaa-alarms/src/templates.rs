use crate::alarm::{
    is_valid_period, AlarmSpec, Comparison, Dimension, Expression, MetricDefinition, MetricQuery,
    MetricStat, MissingData, QuerySource, Statistic, Tag,
};

/// CloudWatch namespace under which MWAA publishes environment metrics.
pub const NAMESPACE: &str = "AmazonMWAA";
/// Tag key recording which environment an alarm belongs to.
pub const ENVIRONMENT_TAG: &str = "MWAAEnvironment";
/// Topic notified by every provisioned alarm, unless overridden.
pub const DEFAULT_ALARM_TOPIC_ARN: &str =
    "arn:aws:sns:us-east-1:091546708236:LambdaStack-AirFlowAlarmsE978FA02-MF61QF9IZCQO";
/// Environment dimension of the parse-time alarm. This is deliberately not
/// the environment the alarm is provisioned for.
pub const DEFAULT_PARSE_TIME_ENVIRONMENT: &str = "data-science";
pub const DEFAULT_UNHEALTHY_WORKER_PERIOD: i32 = 900;
pub const DEFAULT_HEARTBEAT_PERIOD: i32 = 300;
pub const DEFAULT_HEARTBEAT_THRESHOLD: f64 = 0.0;
pub const DEFAULT_PARSE_TIME_PERIOD: i32 = 300;
pub const DEFAULT_PARSE_TIME_THRESHOLD: f64 = 2.0;
pub const DEFAULT_PARSE_TIME_EVALUATION_PERIODS: i32 = 2;

/// Tunables of the alarm templates. Defaults reproduce the values the
/// provisioner has always used.
#[derive(Debug, Clone, PartialEq, clap::Args)]
#[clap(rename_all = "kebab-case")]
pub struct Settings {
    /// ARN of the SNS topic notified when any alarm fires.
    #[clap(long, env = "ALARM_TOPIC_ARN", default_value = DEFAULT_ALARM_TOPIC_ARN, global = true)]
    pub alarm_topic_arn: String,
    /// Period, in seconds, of the queued and running task metrics.
    #[clap(long, env = "UNHEALTHY_WORKER_PERIOD", default_value_t = DEFAULT_UNHEALTHY_WORKER_PERIOD, global = true)]
    pub unhealthy_worker_period: i32,
    /// Period, in seconds, of the scheduler heartbeat average.
    #[clap(long, env = "HEARTBEAT_PERIOD", default_value_t = DEFAULT_HEARTBEAT_PERIOD, global = true)]
    pub heartbeat_period: i32,
    /// Heartbeat values at or below this threshold are breaching.
    #[clap(long, env = "HEARTBEAT_THRESHOLD", default_value_t = DEFAULT_HEARTBEAT_THRESHOLD, global = true)]
    pub heartbeat_threshold: f64,
    /// Period, in seconds, of the DAG parse time average.
    #[clap(long, env = "PARSE_TIME_PERIOD", default_value_t = DEFAULT_PARSE_TIME_PERIOD, global = true)]
    pub parse_time_period: i32,
    /// Parse times above this threshold are breaching.
    #[clap(long, env = "PARSE_TIME_THRESHOLD", default_value_t = DEFAULT_PARSE_TIME_THRESHOLD, global = true)]
    pub parse_time_threshold: f64,
    /// Number of consecutive breaching periods before the parse time alarm fires.
    #[clap(long, env = "PARSE_TIME_EVALUATION_PERIODS", default_value_t = DEFAULT_PARSE_TIME_EVALUATION_PERIODS, global = true)]
    pub parse_time_evaluation_periods: i32,
    /// Environment dimension watched by the parse time alarm of every environment.
    #[clap(long, env = "PARSE_TIME_ENVIRONMENT", default_value = DEFAULT_PARSE_TIME_ENVIRONMENT, global = true)]
    pub parse_time_environment: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alarm_topic_arn: DEFAULT_ALARM_TOPIC_ARN.to_string(),
            unhealthy_worker_period: DEFAULT_UNHEALTHY_WORKER_PERIOD,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            heartbeat_threshold: DEFAULT_HEARTBEAT_THRESHOLD,
            parse_time_period: DEFAULT_PARSE_TIME_PERIOD,
            parse_time_threshold: DEFAULT_PARSE_TIME_THRESHOLD,
            parse_time_evaluation_periods: DEFAULT_PARSE_TIME_EVALUATION_PERIODS,
            parse_time_environment: DEFAULT_PARSE_TIME_ENVIRONMENT.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidSettings {
    #[error("{setting} is {period} seconds, but must be 10, 20, 30 or a multiple of 60")]
    Period { setting: &'static str, period: i32 },
    #[error("parse-time-evaluation-periods must be at least 1, not {0}")]
    EvaluationPeriods(i32),
}

impl Settings {
    /// Check settings which would render alarms the backend rejects.
    pub fn validate(&self) -> Result<(), InvalidSettings> {
        for (setting, period) in [
            ("unhealthy-worker-period", self.unhealthy_worker_period),
            ("heartbeat-period", self.heartbeat_period),
            ("parse-time-period", self.parse_time_period),
        ] {
            if !is_valid_period(period) {
                return Err(InvalidSettings::Period { setting, period });
            }
        }
        if self.parse_time_evaluation_periods < 1 {
            return Err(InvalidSettings::EvaluationPeriods(
                self.parse_time_evaluation_periods,
            ));
        }
        Ok(())
    }
}

/// The alarms provisioned for every environment, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    /// Tasks are queued while no tasks are running.
    UnhealthyWorker,
    /// The scheduler stopped reporting heartbeats.
    HeartbeatFail,
    /// DAG files take too long to parse.
    TotalParseTime,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 3] = [
        AlarmKind::UnhealthyWorker,
        AlarmKind::HeartbeatFail,
        AlarmKind::TotalParseTime,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            AlarmKind::UnhealthyWorker => "UnhealthyWorker",
            AlarmKind::HeartbeatFail => "HeartbeatFail",
            AlarmKind::TotalParseTime => "TotalParseTime",
        }
    }

    pub fn alarm_name(self, environment: &str) -> String {
        format!("Airflow-{environment}-{}", self.suffix())
    }

    /// Render this template for `environment`.
    pub fn render(self, environment: &str, settings: &Settings) -> AlarmSpec {
        match self {
            AlarmKind::UnhealthyWorker => unhealthy_worker(environment, settings),
            AlarmKind::HeartbeatFail => heartbeat_fail(environment, settings),
            AlarmKind::TotalParseTime => total_parse_time(environment, settings),
        }
    }
}

fn unhealthy_worker(environment: &str, settings: &Settings) -> AlarmSpec {
    let period = settings.unhealthy_worker_period;
    let tasks = |id: &str, metric_name: &str| MetricQuery {
        id: id.to_string(),
        label: None,
        return_data: false,
        source: QuerySource::Stat(MetricStat {
            namespace: NAMESPACE.to_string(),
            metric_name: metric_name.to_string(),
            dimensions: vec![
                Dimension::new("Function", "Executor"),
                Dimension::new("Environment", environment),
            ],
            stat: Statistic::Maximum,
            period,
        }),
    };

    // Queued work with nothing running means the worker fleet is stalled.
    let stalled = Expression::if_then_else(
        Expression::metric("m1")
            .greater_than(Expression::metric("m2"))
            .and(Expression::metric("m2").equals(Expression::constant(0.0))),
        Expression::constant(1.0),
        Expression::constant(0.0),
    );

    AlarmSpec {
        name: AlarmKind::UnhealthyWorker.alarm_name(environment),
        description: format!(
            "Worker tasks queued no tasks running {}",
            describe_period(period)
        ),
        comparison: Comparison::GreaterThanThreshold,
        evaluation_periods: 1,
        datapoints_to_alarm: 1,
        threshold: 0.0,
        treat_missing_data: MissingData::Missing,
        actions_enabled: true,
        alarm_actions: vec![settings.alarm_topic_arn.clone()],
        insufficient_data_actions: None,
        metric: MetricDefinition::Queries(vec![
            MetricQuery {
                id: "e1".to_string(),
                label: Some("QueuedGreaterThanRunningAndRunningIsZero".to_string()),
                return_data: true,
                source: QuerySource::Expression(stalled),
            },
            tasks("m1", "QueuedTasks"),
            tasks("m2", "RunningTasks"),
        ]),
        tags: environment_tags(environment),
    }
}

fn heartbeat_fail(environment: &str, settings: &Settings) -> AlarmSpec {
    let period = settings.heartbeat_period;

    AlarmSpec {
        name: AlarmKind::HeartbeatFail.alarm_name(environment),
        description: format!("Scheduler no heartbeat {}", describe_period(period)),
        comparison: Comparison::LessThanOrEqualToThreshold,
        evaluation_periods: 1,
        datapoints_to_alarm: 1,
        threshold: settings.heartbeat_threshold,
        // An absent heartbeat is itself the failure.
        treat_missing_data: MissingData::Breaching,
        actions_enabled: true,
        alarm_actions: vec![settings.alarm_topic_arn.clone()],
        insufficient_data_actions: None,
        metric: MetricDefinition::Queries(vec![MetricQuery {
            id: "m1".to_string(),
            label: None,
            return_data: true,
            source: QuerySource::Stat(MetricStat {
                namespace: NAMESPACE.to_string(),
                metric_name: "SchedulerHeartbeat".to_string(),
                dimensions: vec![
                    Dimension::new("Function", "Scheduler"),
                    Dimension::new("Environment", environment),
                ],
                stat: Statistic::Average,
                period,
            }),
        }]),
        tags: environment_tags(environment),
    }
}

fn total_parse_time(environment: &str, settings: &Settings) -> AlarmSpec {
    let periods = settings.parse_time_evaluation_periods;

    AlarmSpec {
        name: AlarmKind::TotalParseTime.alarm_name(environment),
        description: format!(
            "TotalParseTime higher than {} seconds in average for {periods} datapoints",
            settings.parse_time_threshold
        ),
        comparison: Comparison::GreaterThanThreshold,
        evaluation_periods: periods,
        datapoints_to_alarm: periods,
        threshold: settings.parse_time_threshold,
        treat_missing_data: MissingData::Missing,
        actions_enabled: true,
        alarm_actions: vec![settings.alarm_topic_arn.clone()],
        insufficient_data_actions: Some(Vec::new()),
        metric: MetricDefinition::Metric(MetricStat {
            namespace: NAMESPACE.to_string(),
            metric_name: "TotalParseTime".to_string(),
            dimensions: vec![
                Dimension::new("Function", "DAG Processing"),
                Dimension::new("Environment", &settings.parse_time_environment),
            ],
            stat: Statistic::Average,
            period: settings.parse_time_period,
        }),
        tags: environment_tags(environment),
    }
}

fn describe_period(seconds: i32) -> String {
    match (seconds / 60, seconds % 60) {
        (1, 0) => "1 minute".to_string(),
        (minutes, 0) => format!("{minutes} minutes"),
        _ => format!("{seconds} seconds"),
    }
}

fn environment_tags(environment: &str) -> Vec<Tag> {
    vec![Tag {
        key: ENVIRONMENT_TAG.to_string(),
        value: environment.to_string(),
    }]
}
