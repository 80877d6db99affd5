// Metrics module - the boundary between the collector and the metrics backend
//
// The collector only needs "evaluate this expression, give me one number".
// Everything about transport, auth and decoding lives behind MetricsBackend.

use async_trait::async_trait;
use thiserror::Error;

pub mod prometheus;

/// Errors returned by a single backend query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("metrics backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics backend returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("metrics backend rejected query ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("malformed metrics backend response: {0}")]
    Decode(String),
}

/// Core trait for anything that can evaluate a scalar usage query.
///
/// Implementations must be shareable across workers: the collector holds a
/// single `&B` and calls `query` concurrently from every worker, so no
/// per-call mutable state may live in the client.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluates `expression` and returns its single scalar value.
    ///
    /// An expression that matches no series evaluates to `0.0`.
    async fn query(&self, expression: &str) -> Result<f64, QueryError>;
}

/// Lookback window the usage maximum is taken over
const USAGE_WINDOW: &str = "7d";
/// Subquery resolution inside the lookback window
const USAGE_RESOLUTION: &str = "1m";
/// Range used to turn the CPU counter into a rate
const CPU_RATE_RANGE: &str = "5m";

/// Builds the CPU and RAM usage expressions for one workload.
#[derive(Debug, Clone)]
pub struct UsageQuery<'a> {
    /// Label carrying the datacenter name, `None` for backends scoped to one cluster
    pub datacenter_label: Option<&'a str>,
    pub datacenter: &'a str,
    pub namespace: &'a str,
    pub pod: &'a str,
    pub instance_id: &'a str,
}

impl UsageQuery<'_> {
    /// Peak CPU usage in cores over the lookback window.
    pub fn cpu(&self) -> String {
        format!(
            "max_over_time(sum(rate(container_cpu_usage_seconds_total{{{}}}[{}]))[{}:{}])",
            self.selector(),
            CPU_RATE_RANGE,
            USAGE_WINDOW,
            USAGE_RESOLUTION
        )
    }

    /// Peak RSS in bytes over the lookback window.
    pub fn ram(&self) -> String {
        format!(
            "max_over_time(sum(container_memory_rss{{{}}})[{}:{}])",
            self.selector(),
            USAGE_WINDOW,
            USAGE_RESOLUTION
        )
    }

    fn selector(&self) -> String {
        let mut matchers = Vec::with_capacity(4);
        if let Some(label) = self.datacenter_label {
            matchers.push(format!("{}=\"{}\"", label, escape_label(self.datacenter)));
        }
        matchers.push(format!("namespace=\"{}\"", escape_label(self.namespace)));
        matchers.push(format!("pod=\"{}\"", escape_label(self.pod)));
        matchers.push(format!("id=~\".*{}.*\"", escape_label(self.instance_id)));
        matchers.join(",")
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query<'a>(label: Option<&'a str>) -> UsageQuery<'a> {
        UsageQuery {
            datacenter_label: label,
            datacenter: "dc1",
            namespace: "payments",
            pod: "api-7d9f",
            instance_id: "aa_bb",
        }
    }

    #[test]
    fn test_cpu_query() {
        assert_eq!(
            query(Some("datacenter")).cpu(),
            "max_over_time(sum(rate(container_cpu_usage_seconds_total{datacenter=\"dc1\",namespace=\"payments\",pod=\"api-7d9f\",id=~\".*aa_bb.*\"}[5m]))[7d:1m])"
        );
    }

    #[test]
    fn test_ram_query_without_datacenter_label() {
        assert_eq!(
            query(None).ram(),
            "max_over_time(sum(container_memory_rss{namespace=\"payments\",pod=\"api-7d9f\",id=~\".*aa_bb.*\"})[7d:1m])"
        );
    }

    #[test]
    fn test_label_values_are_escaped() {
        let q = UsageQuery {
            pod: "we\"ird",
            ..query(None)
        };
        assert!(q.ram().contains("pod=\"we\\\"ird\""));
    }
}
