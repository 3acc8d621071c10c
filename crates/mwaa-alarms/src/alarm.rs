//! Declarative model of a CloudWatch metric alarm, mirroring the shape of
//! a `PutMetricAlarm` request. Specs are rendered from templates on every
//! invocation and handed to an [`AlarmBackend`](crate::AlarmBackend).

/// A fully-rendered alarm, ready to be upserted by name.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmSpec {
    #[serde(rename = "AlarmName")]
    pub name: String,
    #[serde(rename = "AlarmDescription")]
    pub description: String,
    #[serde(rename = "ComparisonOperator")]
    pub comparison: Comparison,
    pub evaluation_periods: i32,
    pub datapoints_to_alarm: i32,
    pub threshold: f64,
    pub treat_missing_data: MissingData,
    pub actions_enabled: bool,
    pub alarm_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insufficient_data_actions: Option<Vec<String>>,
    #[serde(flatten)]
    pub metric: MetricDefinition,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Comparison {
    GreaterThanThreshold,
    LessThanOrEqualToThreshold,
}

/// How the backend treats an evaluation period without datapoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingData {
    /// The period is skipped and never counts as breaching.
    Missing,
    /// The period counts as breaching.
    Breaching,
}

impl MissingData {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingData::Missing => "missing",
            MissingData::Breaching => "breaching",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Statistic {
    Average,
    Maximum,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Average => "Average",
            Statistic::Maximum => "Maximum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// A single statistic of a single metric, sampled over `period` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricStat {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub stat: Statistic,
    pub period: i32,
}

/// Whether CloudWatch accepts `period` seconds as an alarm period.
pub fn is_valid_period(period: i32) -> bool {
    matches!(period, 10 | 20 | 30) || (period > 0 && period % 60 == 0)
}

/// What an alarm watches: either one metric directly, or a set of metric
/// queries of which exactly one returns the value compared to the threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricDefinition {
    Metric(MetricStat),
    Queries(Vec<MetricQuery>),
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireMetric<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: &'a [Dimension],
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireMetricStat<'a> {
    metric: WireMetric<'a>,
    period: i32,
    stat: Statistic,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireFlatMetric<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    statistic: Statistic,
    dimensions: &'a [Dimension],
    period: i32,
}

#[derive(serde::Serialize)]
struct WireQueries<'a> {
    #[serde(rename = "Metrics")]
    metrics: &'a [MetricQuery],
}

// Within metric queries a stat nests its metric, as in `PutMetricAlarm`.
impl serde::Serialize for MetricStat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireMetricStat {
            metric: WireMetric {
                namespace: &self.namespace,
                metric_name: &self.metric_name,
                dimensions: &self.dimensions,
            },
            period: self.period,
            stat: self.stat,
        }
        .serialize(serializer)
    }
}

// A single metric is spelled out by top-level request fields.
impl serde::Serialize for MetricDefinition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricDefinition::Metric(stat) => WireFlatMetric {
                namespace: &stat.namespace,
                metric_name: &stat.metric_name,
                statistic: stat.stat,
                dimensions: &stat.dimensions,
                period: stat.period,
            }
            .serialize(serializer),
            MetricDefinition::Queries(queries) => {
                WireQueries { metrics: queries }.serialize(serializer)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricQuery {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub return_data: bool,
    #[serde(flatten)]
    pub source: QuerySource,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum QuerySource {
    #[serde(rename = "MetricStat")]
    Stat(MetricStat),
    Expression(Expression),
}

/// A metric math expression over other queries of the same alarm.
/// Comparisons and `AND` evaluate to 1 (true) or 0 (false).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Reference to another query by its id.
    Metric(String),
    Constant(f64),
    GreaterThan(Box<Expression>, Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    If {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
}

impl Expression {
    pub fn metric(id: impl Into<String>) -> Self {
        Expression::Metric(id.into())
    }

    pub fn constant(value: f64) -> Self {
        Expression::Constant(value)
    }

    pub fn greater_than(self, rhs: Expression) -> Self {
        Expression::GreaterThan(Box::new(self), Box::new(rhs))
    }

    pub fn equals(self, rhs: Expression) -> Self {
        Expression::Equal(Box::new(self), Box::new(rhs))
    }

    pub fn and(self, rhs: Expression) -> Self {
        Expression::And(Box::new(self), Box::new(rhs))
    }

    pub fn if_then_else(condition: Expression, then: Expression, otherwise: Expression) -> Self {
        Expression::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Ids of all queries referenced by this expression, in order of appearance.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Metric(id) => out.push(id),
            Expression::Constant(_) => {}
            Expression::GreaterThan(l, r) | Expression::Equal(l, r) | Expression::And(l, r) => {
                l.collect_references(out);
                r.collect_references(out);
            }
            Expression::If {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(out);
                then.collect_references(out);
                otherwise.collect_references(out);
            }
        }
    }

    fn fmt_operand(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Comparisons bind tighter than AND, so nested logic needs parentheses.
        match self {
            Expression::GreaterThan(..) | Expression::Equal(..) | Expression::And(..) => {
                write!(f, "({self})")
            }
            _ => write!(f, "{self}"),
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Metric(id) => f.write_str(id),
            Expression::Constant(value) => write!(f, "{value}"),
            Expression::GreaterThan(l, r) => {
                l.fmt_operand(f)?;
                f.write_str(" > ")?;
                r.fmt_operand(f)
            }
            Expression::Equal(l, r) => {
                l.fmt_operand(f)?;
                f.write_str(" == ")?;
                r.fmt_operand(f)
            }
            Expression::And(l, r) => write!(f, "{l} AND {r}"),
            Expression::If {
                condition,
                then,
                otherwise,
            } => write!(f, "IF({condition}, {then}, {otherwise})"),
        }
    }
}

impl serde::Serialize for Expression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidSpec {
    #[error("alarm name must not be empty")]
    EmptyName,
    #[error("alarm {name} must have exactly one query returning data, but has {count}")]
    ReturnData { name: String, count: usize },
    #[error("alarm {name} requires {datapoints} datapoints but evaluates only {evaluation} periods")]
    Datapoints {
        name: String,
        datapoints: i32,
        evaluation: i32,
    },
    #[error("alarm {name} has period {period}, which is not 10, 20, 30 or a multiple of 60 seconds")]
    Period { name: String, period: i32 },
    #[error("alarm {name} expression {id} references unknown query {reference}")]
    UnknownQuery {
        name: String,
        id: String,
        reference: String,
    },
}

impl AlarmSpec {
    /// The query whose result is compared against the threshold, if this
    /// spec is built from metric queries.
    pub fn returned_query(&self) -> Option<&MetricQuery> {
        match &self.metric {
            MetricDefinition::Metric(_) => None,
            MetricDefinition::Queries(queries) => queries.iter().find(|q| q.return_data),
        }
    }

    /// Check the structural rules the backend would otherwise reject.
    pub fn validate(&self) -> Result<(), InvalidSpec> {
        if self.name.is_empty() {
            return Err(InvalidSpec::EmptyName);
        }
        if self.evaluation_periods < 1
            || self.datapoints_to_alarm < 1
            || self.datapoints_to_alarm > self.evaluation_periods
        {
            return Err(InvalidSpec::Datapoints {
                name: self.name.clone(),
                datapoints: self.datapoints_to_alarm,
                evaluation: self.evaluation_periods,
            });
        }

        let check_period = |stat: &MetricStat| {
            if !is_valid_period(stat.period) {
                Err(InvalidSpec::Period {
                    name: self.name.clone(),
                    period: stat.period,
                })
            } else {
                Ok(())
            }
        };

        match &self.metric {
            MetricDefinition::Metric(stat) => check_period(stat),
            MetricDefinition::Queries(queries) => {
                let count = queries.iter().filter(|q| q.return_data).count();
                if count != 1 {
                    return Err(InvalidSpec::ReturnData {
                        name: self.name.clone(),
                        count,
                    });
                }
                for query in queries {
                    match &query.source {
                        QuerySource::Stat(stat) => check_period(stat)?,
                        QuerySource::Expression(expr) => {
                            for reference in expr.references() {
                                if !queries.iter().any(|q| q.id == reference) {
                                    return Err(InvalidSpec::UnknownQuery {
                                        name: self.name.clone(),
                                        id: query.id.clone(),
                                        reference: reference.to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
