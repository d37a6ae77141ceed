//! Metric instruments shared by every interceptor.
//!
//! | Instrument | Kind | Unit |
//! |------------|------|------|
//! | `gen_ai.client.requests` | counter | `{request}` |
//! | `gen_ai.client.usage.{input,output,total,reasoning}_tokens` | counter | `{token}` |
//! | `gen_ai.client.token.usage` | histogram | `{token}` |
//! | `gen_ai.client.usage.cost` | histogram | `USD` |
//! | `gen_ai.client.operation.duration` | histogram | `s` |
//! | `gen_ai.server.time_to_first_token` | histogram | `s` |
//! | `gen_ai.server.time_per_output_token` | histogram | `s` |
//! | `db.client.operation.duration` | histogram | `s` |
//!
//! All instruments are created eagerly in [`MetricsRegistry::new`]. Cloning
//! the registry clones handles to the same instruments; aggregation and its
//! thread safety belong to the metrics SDK.

use std::fmt;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::semconv::{self, metric};
use crate::usage::{OperationKind, UsageRecord};

/// Operation duration buckets, seconds. Doubling from 10ms to ~80s.
pub const DURATION_BUCKETS: [f64; 14] = [
    0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
];

/// Token count buckets, powers of four.
pub const TOKEN_BUCKETS: [f64; 14] = [
    1.0, 4.0, 16.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0,
    4194304.0, 16777216.0, 67108864.0,
];

/// Cost buckets, USD.
pub const COST_BUCKETS: [f64; 12] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0,
];

pub const TIME_TO_FIRST_TOKEN_BUCKETS: [f64; 13] = [
    0.001, 0.005, 0.01, 0.02, 0.04, 0.06, 0.08, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
];

pub const TIME_PER_OUTPUT_TOKEN_BUCKETS: [f64; 13] = [
    0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0, 2.5,
];

/// Handles to every instrument the pipeline records into.
#[derive(Clone)]
pub struct MetricsRegistry {
    requests: Counter<u64>,
    input_tokens: Counter<u64>,
    output_tokens: Counter<u64>,
    total_tokens: Counter<u64>,
    reasoning_tokens: Counter<u64>,
    token_usage: Histogram<u64>,
    cost: Histogram<f64>,
    operation_duration: Histogram<f64>,
    time_to_first_token: Histogram<f64>,
    time_per_output_token: Histogram<f64>,
    backend_operation_duration: Histogram<f64>,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Create every instrument on the given meter.
    pub fn new(meter: &Meter) -> Self {
        let counter = |name: &'static str, description: &'static str, unit: &'static str| {
            meter
                .u64_counter(name)
                .with_description(description)
                .with_unit(unit)
                .build()
        };
        let seconds = |name: &'static str, description: &'static str, buckets: &[f64]| {
            meter
                .f64_histogram(name)
                .with_description(description)
                .with_unit("s")
                .with_boundaries(buckets.to_vec())
                .build()
        };

        Self {
            requests: counter(metric::REQUESTS, "Number of intercepted provider calls", "{request}"),
            input_tokens: counter(metric::INPUT_TOKENS, "Prompt tokens consumed", "{token}"),
            output_tokens: counter(metric::OUTPUT_TOKENS, "Completion tokens generated", "{token}"),
            total_tokens: counter(metric::TOTAL_TOKENS, "Total tokens consumed", "{token}"),
            reasoning_tokens: counter(
                metric::REASONING_TOKENS,
                "Reasoning tokens generated",
                "{token}",
            ),
            token_usage: meter
                .u64_histogram(metric::TOKEN_USAGE)
                .with_description("Tokens per call by token type")
                .with_unit("{token}")
                .with_boundaries(TOKEN_BUCKETS.to_vec())
                .build(),
            cost: meter
                .f64_histogram(metric::COST)
                .with_description("Cost per call")
                .with_unit("USD")
                .with_boundaries(COST_BUCKETS.to_vec())
                .build(),
            operation_duration: seconds(
                metric::OPERATION_DURATION,
                "Duration of provider calls",
                &DURATION_BUCKETS,
            ),
            time_to_first_token: seconds(
                metric::TIME_TO_FIRST_TOKEN,
                "Time from request start to the first streamed chunk",
                &TIME_TO_FIRST_TOKEN_BUCKETS,
            ),
            time_per_output_token: seconds(
                metric::TIME_PER_OUTPUT_TOKEN,
                "Mean interval between streamed chunks",
                &TIME_PER_OUTPUT_TOKEN_BUCKETS,
            ),
            backend_operation_duration: seconds(
                metric::BACKEND_OPERATION_DURATION,
                "Duration of retrieval and other backend calls",
                &DURATION_BUCKETS,
            ),
        }
    }

    /// Record a finished call.
    pub fn record_usage(&self, record: &UsageRecord, attributes: &[KeyValue]) {
        self.requests.add(1, attributes);
        let seconds = record.duration.as_secs_f64();
        self.operation_duration.record(seconds, attributes);

        if record.operation == OperationKind::Retrieval {
            self.backend_operation_duration.record(seconds, attributes);
            return;
        }

        let usage = &record.usage;
        if usage.prompt_tokens > 0 {
            self.input_tokens.add(usage.prompt_tokens, attributes);
            self.token_usage
                .record(usage.prompt_tokens, &with_token_type(attributes, "input"));
        }
        if usage.completion_tokens > 0 {
            self.output_tokens.add(usage.completion_tokens, attributes);
            self.token_usage
                .record(usage.completion_tokens, &with_token_type(attributes, "output"));
        }
        let total = usage.total();
        if total > 0 {
            self.total_tokens.add(total, attributes);
        }
        if usage.reasoning_tokens > 0 {
            self.reasoning_tokens.add(usage.reasoning_tokens, attributes);
        }
        self.cost.record(record.cost, attributes);
    }

    /// Record a failed call. `attributes` should carry `error.type`.
    pub fn record_failure(&self, operation: OperationKind, duration: Duration, attributes: &[KeyValue]) {
        self.requests.add(1, attributes);
        let seconds = duration.as_secs_f64();
        self.operation_duration.record(seconds, attributes);
        if operation == OperationKind::Retrieval {
            self.backend_operation_duration.record(seconds, attributes);
        }
    }

    /// Record streaming latencies.
    pub fn record_stream_timings(
        &self,
        time_to_first_chunk: Option<Duration>,
        time_per_chunk: Option<Duration>,
        attributes: &[KeyValue],
    ) {
        if let Some(ttft) = time_to_first_chunk {
            self.time_to_first_token.record(ttft.as_secs_f64(), attributes);
        }
        if let Some(tpot) = time_per_chunk {
            self.time_per_output_token.record(tpot.as_secs_f64(), attributes);
        }
    }
}

fn with_token_type(attributes: &[KeyValue], token_type: &'static str) -> Vec<KeyValue> {
    let mut attrs = attributes.to_vec();
    attrs.push(KeyValue::new(semconv::TOKEN_TYPE, token_type));
    attrs
}
