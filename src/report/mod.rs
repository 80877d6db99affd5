// Report module - assembles ranked views into a publishable report
//
// A report is built once, after a successful collection run, and handed to a
// sink. It borrows the rated records instead of copying them.

pub mod slack;
pub mod table;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::ranking::{top_n, top_n_flagged, Metric, Order, Resource};
use crate::workload::{Datacenter, WorkloadRecord};

/// Name of the cross-datacenter section
pub const ALL_DATACENTERS: &str = "all datacenters";

/// Errors raised while publishing a report
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("request to Slack failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Slack returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Slack API error: {0}")]
    Api(String),
}

/// Destination for a finished report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &Report<'_>) -> Result<(), SinkError>;
}

/// Ranked views for one datacenter (or for all of them)
#[derive(Debug)]
pub struct Section<'a> {
    pub datacenter: String,
    pub top_cpu: Vec<&'a WorkloadRecord>,
    pub top_ram: Vec<&'a WorkloadRecord>,
    /// Misconfigured CPU requests, highest usage first
    pub flagged_cpu: Vec<&'a WorkloadRecord>,
    /// Misconfigured RAM requests, highest usage first
    pub flagged_ram: Vec<&'a WorkloadRecord>,
}

impl<'a> Section<'a> {
    fn build<I>(datacenter: &str, records: I, top: usize) -> Self
    where
        I: IntoIterator<Item = &'a WorkloadRecord> + Clone,
    {
        Section {
            datacenter: datacenter.to_string(),
            top_cpu: top_n(records.clone(), Metric::CpuUsage, Order::Descending, top),
            top_ram: top_n(records.clone(), Metric::RamUsage, Order::Descending, top),
            flagged_cpu: top_n_flagged(
                records.clone(),
                Resource::Cpu,
                Metric::CpuUsage,
                Order::Descending,
                top,
            ),
            flagged_ram: top_n_flagged(
                records,
                Resource::Ram,
                Metric::RamUsage,
                Order::Descending,
                top,
            ),
        }
    }
}

/// A dated report with one section per datacenter
#[derive(Debug)]
pub struct Report<'a> {
    pub date: NaiveDate,
    /// Number of entries requested per view
    pub top: usize,
    pub sections: Vec<Section<'a>>,
}

impl<'a> Report<'a> {
    /// Builds a report from rated datacenters.
    ///
    /// # Arguments
    /// * `datacenters` - Datacenters after a successful collection run
    /// * `top` - Entries per view, clamped to each datacenter's record count
    /// * `include_all` - Append a section ranking every record across datacenters
    /// * `date` - Date shown in the report title
    pub fn build(
        datacenters: &'a [Datacenter],
        top: usize,
        include_all: bool,
        date: NaiveDate,
    ) -> Self {
        let mut sections: Vec<Section<'a>> = datacenters
            .iter()
            .map(|dc| Section::build(&dc.name, dc.records.iter(), top))
            .collect();

        if include_all && datacenters.len() > 1 {
            let all = Datacenter::all_records(datacenters);
            sections.push(Section::build(ALL_DATACENTERS, all.iter().copied(), top));
        }

        Report {
            date,
            top,
            sections,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::workload::Rating;

    pub(crate) fn rated(
        dc: &str,
        name: &str,
        cpu_usage: f64,
        ram_usage: f64,
        cpu_rating: Rating,
        ram_rating: Rating,
    ) -> WorkloadRecord {
        let mut record = WorkloadRecord::new(dc, "default", name, name);
        record.cpu_usage_millicores = cpu_usage;
        record.ram_usage_mebibytes = ram_usage;
        record.cpu_rating = cpu_rating;
        record.ram_rating = ram_rating;
        record
    }

    pub(crate) fn sample() -> Vec<Datacenter> {
        use Rating::*;
        vec![
            Datacenter::new(
                "dc1",
                vec![
                    rated("dc1", "api", 900.0, 100.0, Misconfigured, Balanced),
                    rated("dc1", "web", 300.0, 400.0, Balanced, Misconfigured),
                    rated("dc1", "cron", 50.0, 10.0, Unset, Unset),
                ],
            ),
            Datacenter::new(
                "dc2",
                vec![rated("dc2", "db", 1200.0, 2048.0, Misconfigured, Misconfigured)],
            ),
        ]
    }

    fn names(records: &[&WorkloadRecord]) -> Vec<String> {
        records.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_sections_follow_datacenter_order() {
        let dcs = sample();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let report = Report::build(&dcs, 2, false, date);

        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.sections[0].datacenter, "dc1");
        assert_eq!(names(&report.sections[0].top_cpu), vec!["api", "web"]);
        assert_eq!(names(&report.sections[0].top_ram), vec!["web", "api"]);
        assert_eq!(report.sections[1].top_cpu.len(), 1);
    }

    #[test]
    fn test_flagged_views_only_hold_misconfigured() {
        let dcs = sample();
        let report = Report::build(&dcs, 5, false, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let dc1 = &report.sections[0];
        assert_eq!(names(&dc1.flagged_cpu), vec!["api"]);
        assert_eq!(names(&dc1.flagged_ram), vec!["web"]);
        for section in &report.sections {
            assert!(section
                .flagged_cpu
                .iter()
                .all(|r| r.cpu_rating == Rating::Misconfigured));
        }
    }

    #[test]
    fn test_all_datacenters_section() {
        let dcs = sample();
        let report = Report::build(&dcs, 2, true, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        assert_eq!(report.sections.len(), 3);
        let all = &report.sections[2];
        assert_eq!(all.datacenter, ALL_DATACENTERS);
        assert_eq!(names(&all.top_cpu), vec!["db", "api"]);
        assert_eq!(names(&all.flagged_ram), vec!["db", "web"]);
    }

    #[test]
    fn test_all_section_skipped_for_single_datacenter() {
        let dcs = vec![sample().remove(0)];
        let report = Report::build(&dcs, 2, true, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(report.sections.len(), 1);
    }
}
