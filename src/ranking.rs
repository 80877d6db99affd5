// Ranking module - read-only top-N views over rated workload records

use std::cmp::Ordering;

use crate::workload::{Rating, WorkloadRecord};

/// Numeric record field a view is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CpuUsage,
    RamUsage,
    CpuLimit,
    RamLimit,
    CpuRequest,
    RamRequest,
    CpuRating,
    RamRating,
}

impl Metric {
    fn value(self, record: &WorkloadRecord) -> f64 {
        match self {
            Metric::CpuUsage => record.cpu_usage_millicores,
            Metric::RamUsage => record.ram_usage_mebibytes,
            Metric::CpuLimit => record.cpu_limit_millicores,
            Metric::RamLimit => record.ram_limit_mebibytes,
            Metric::CpuRequest => record.cpu_request_millicores,
            Metric::RamRequest => record.ram_request_mebibytes,
            Metric::CpuRating => f64::from(record.cpu_rating.code()),
            Metric::RamRating => f64::from(record.ram_rating.code()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Resource whose rating a flagged view filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Ram,
}

impl Resource {
    fn rating(self, record: &WorkloadRecord) -> Rating {
        match self {
            Resource::Cpu => record.cpu_rating,
            Resource::Ram => record.ram_rating,
        }
    }
}

/// Returns the first `n` records ordered by `metric`.
///
/// The sort is stable, so records with equal values keep their input order.
/// `n` larger than the input simply returns everything.
pub fn top_n<'a, I>(records: I, metric: Metric, order: Order, n: usize) -> Vec<&'a WorkloadRecord>
where
    I: IntoIterator<Item = &'a WorkloadRecord>,
{
    let mut ranked: Vec<&WorkloadRecord> = records.into_iter().collect();
    ranked.sort_by(|a, b| compare(metric.value(a), metric.value(b), order));
    ranked.truncate(n);
    ranked
}

/// Like [`top_n`], restricted to records whose `resource` rating is
/// `Misconfigured`.
pub fn top_n_flagged<'a, I>(
    records: I,
    resource: Resource,
    metric: Metric,
    order: Order,
    n: usize,
) -> Vec<&'a WorkloadRecord>
where
    I: IntoIterator<Item = &'a WorkloadRecord>,
{
    top_n(
        records
            .into_iter()
            .filter(|record| resource.rating(record) == Rating::Misconfigured),
        metric,
        order,
        n,
    )
}

fn compare(a: f64, b: f64, order: Order) -> Ordering {
    match order {
        Order::Ascending => a.total_cmp(&b),
        Order::Descending => b.total_cmp(&a),
    }
}
