use shared::metrics_defs::{MetricDef, MetricType};

pub const FILES_CENSORED: MetricDef = MetricDef {
    name: "pod_utils.censor.files",
    metric_type: MetricType::Counter,
    description: "Files rewritten by the censorer",
};

pub const SECRETS_CENSORED: MetricDef = MetricDef {
    name: "pod_utils.censor.secrets",
    metric_type: MetricType::Counter,
    description: "Secret occurrences masked across all censored files",
};

pub const ALL_METRICS: &[MetricDef] = &[FILES_CENSORED, SECRETS_CENSORED];
