use shared::metrics_defs::{MetricDef, MetricType};

pub const WEBHOOK_RECEIVED: MetricDef = MetricDef {
    name: "hook.webhook.received",
    metric_type: MetricType::Counter,
    description: "Webhooks accepted for dispatch. Tagged with event_type.",
};

pub const WEBHOOK_RESPONSES: MetricDef = MetricDef {
    name: "hook.webhook.responses",
    metric_type: MetricType::Counter,
    description: "Responses sent to webhook requests. Tagged with status.",
};

pub const PLUGIN_HANDLE_DURATION: MetricDef = MetricDef {
    name: "hook.plugin.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent in one plugin handler in seconds. Tagged with plugin, event_type, outcome.",
};

pub const PLUGIN_HANDLE_ERRORS: MetricDef = MetricDef {
    name: "hook.plugin.errors",
    metric_type: MetricType::Counter,
    description: "Plugin handlers that returned an error. Tagged with plugin, event_type.",
};

pub const EXTERNAL_DISPATCH_DURATION: MetricDef = MetricDef {
    name: "hook.external.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent forwarding one webhook to an external plugin, retries included. Tagged with plugin, outcome.",
};

pub const HANDLERS_INFLIGHT: MetricDef = MetricDef {
    name: "hook.handlers.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of plugin handlers currently running",
};

pub const CONFIG_RELOADS: MetricDef = MetricDef {
    name: "hook.config.reloads",
    metric_type: MetricType::Counter,
    description: "Periodic config reloads. Tagged with outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOK_RECEIVED,
    WEBHOOK_RESPONSES,
    PLUGIN_HANDLE_DURATION,
    PLUGIN_HANDLE_ERRORS,
    EXTERNAL_DISPATCH_DURATION,
    HANDLERS_INFLIGHT,
    CONFIG_RELOADS,
];
