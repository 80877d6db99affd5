// Table sink - prints the report to stdout for dry runs

use async_trait::async_trait;
use tabled::{settings::Style, Table, Tabled};

use super::{Report, ReportSink, Section, SinkError};
use crate::workload::WorkloadRecord;

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "CPU Req")]
    cpu_request: String,
    #[tabled(rename = "CPU Lim")]
    cpu_limit: String,
    #[tabled(rename = "RAM")]
    ram: String,
    #[tabled(rename = "RAM Req")]
    ram_request: String,
    #[tabled(rename = "RAM Lim")]
    ram_limit: String,
    #[tabled(rename = "CPU Rating")]
    cpu_rating: String,
    #[tabled(rename = "RAM Rating")]
    ram_rating: String,
}

impl From<&WorkloadRecord> for Row {
    fn from(record: &WorkloadRecord) -> Self {
        Row {
            namespace: record.namespace.clone(),
            pod: record.name.clone(),
            cpu: format!("{:.1}m", record.cpu_usage_millicores),
            cpu_request: format!("{:.1}m", record.cpu_request_millicores),
            cpu_limit: format!("{:.1}m", record.cpu_limit_millicores),
            ram: format!("{:.1}Mi", record.ram_usage_mebibytes),
            ram_request: format!("{:.1}Mi", record.ram_request_mebibytes),
            ram_limit: format!("{:.1}Mi", record.ram_limit_mebibytes),
            cpu_rating: record.cpu_rating.to_string(),
            ram_rating: record.ram_rating.to_string(),
        }
    }
}

/// Writes every section as a set of rounded tables.
#[derive(Default)]
pub struct TableSink;

#[async_trait]
impl ReportSink for TableSink {
    async fn publish(&self, report: &Report<'_>) -> Result<(), SinkError> {
        println!("{}", render(report));
        Ok(())
    }
}

fn render(report: &Report<'_>) -> String {
    let mut out = format!(
        "Kubernetes resources report {}\n",
        report.date.format("%m-%d-%Y")
    );

    for section in &report.sections {
        out.push_str(&render_section(section));
    }
    out
}

fn render_section(section: &Section<'_>) -> String {
    let views = [
        ("Top pods by CPU", &section.top_cpu),
        ("Top pods by RAM", &section.top_ram),
        ("Possible wrong CPU requests", &section.flagged_cpu),
        ("Possible wrong RAM requests", &section.flagged_ram),
    ];

    let mut out = format!("\n== {} ==\n", section.datacenter.to_uppercase());
    for (title, records) in views {
        out.push_str(&format!("\n{}\n", title));
        if records.is_empty() {
            out.push_str("(none)\n");
            continue;
        }
        let rows: Vec<Row> = records.iter().map(|r| Row::from(*r)).collect();
        out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample;
    use chrono::NaiveDate;

    #[test]
    fn test_render_lists_every_section() {
        let dcs = sample();
        let report = Report::build(&dcs, 5, true, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let out = render(&report);

        assert!(out.starts_with("Kubernetes resources report 03-01-2024"));
        assert!(out.contains("== DC1 =="));
        assert!(out.contains("== DC2 =="));
        assert!(out.contains("== ALL DATACENTERS =="));
        assert!(out.contains("CPU Rating"));
        assert!(out.contains("misconfigured"));
    }

    #[test]
    fn test_empty_view_is_marked() {
        let mut dcs = sample();
        dcs.truncate(1);
        dcs[0].records.retain(|r| r.name == "cron");
        let report = Report::build(&dcs, 5, false, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let out = render_section(&report.sections[0]);

        assert!(out.contains("Possible wrong CPU requests\n(none)"));
        assert!(out.contains("cron"));
    }
}
