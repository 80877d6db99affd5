// Slack sink - posts the report as Block Kit blocks via chat.postMessage

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{Report, ReportSink, Section, SinkError};
use crate::workload::WorkloadRecord;

const SLACK_API: &str = "https://slack.com/api";
const SLACK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlackSink {
    http_client: Client,
    token: String,
    channel: String,
}

/// Common envelope of every Slack Web API response
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackSink {
    pub fn new(token: String, channel: String) -> Result<Self, SinkError> {
        let http_client = Client::builder().timeout(SLACK_TIMEOUT).build()?;
        Ok(SlackSink {
            http_client,
            token,
            channel,
        })
    }

    /// Checks the bot token before any work is done.
    pub async fn auth_test(&self) -> Result<(), SinkError> {
        self.call("auth.test", &json!({})).await?;
        info!("Slack token verified");
        Ok(())
    }

    async fn call(&self, method: &str, body: &Value) -> Result<(), SinkError> {
        let response = self
            .http_client
            .post(format!("{}/{}", SLACK_API, method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!(method, status = status.as_u16(), "Slack responded");
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }

        let reply: ApiResponse = response.json().await?;
        if reply.ok {
            Ok(())
        } else {
            Err(SinkError::Api(
                reply.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }
}

#[async_trait]
impl ReportSink for SlackSink {
    async fn publish(&self, report: &Report<'_>) -> Result<(), SinkError> {
        let blocks = blocks(report);
        info!(channel = %self.channel, blocks = blocks.len(), "Sending report to Slack");

        self.call(
            "chat.postMessage",
            &json!({
                "channel": self.channel,
                "text": title(report),
                "blocks": blocks,
            }),
        )
        .await
    }
}

fn title(report: &Report<'_>) -> String {
    format!(
        "Daily kubernetes resources news for {}",
        report.date.format("%m-%d-%Y")
    )
}

/// Renders the report as Block Kit blocks.
fn blocks(report: &Report<'_>) -> Vec<Value> {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": ":newspaper: Daily kubernetes resources news :newspaper:",
            },
        }),
        context(format!("*{}* | pod-reporter", report.date.format("%m-%d-%Y"))),
        json!({ "type": "divider" }),
    ];

    for section in &report.sections {
        section_blocks(section, &mut blocks);
        blocks.push(json!({ "type": "divider" }));
    }

    blocks
}

fn section_blocks(section: &Section<'_>, blocks: &mut Vec<Value>) {
    blocks.push(markdown(format!(
        ":office: *Datacenter:* {}",
        section.datacenter.to_uppercase()
    )));

    blocks.push(markdown(format!("*Top {} pods by CPU*", section.top_cpu.len())));
    blocks.push(context(lines(&section.top_cpu, |r| {
        format!("*CPU:* {:.1}m\t*Limits:* {:.1}m", r.cpu_usage_millicores, r.cpu_limit_millicores)
    })));

    blocks.push(markdown(format!("*Top {} pods by RAM*", section.top_ram.len())));
    blocks.push(context(lines(&section.top_ram, |r| {
        format!("*RAM:* {:.1}Mi\t*Limits:* {:.1}Mi", r.ram_usage_mebibytes, r.ram_limit_mebibytes)
    })));

    blocks.push(markdown("*Pods with possible wrong CPU requests*".to_string()));
    blocks.push(context(lines(&section.flagged_cpu, |r| {
        format!(
            "*CPU:* {:.1}m\t*Requests:* {:.1}m",
            r.cpu_usage_millicores, r.cpu_request_millicores
        )
    })));

    blocks.push(markdown("*Pods with possible wrong RAM requests*".to_string()));
    blocks.push(context(lines(&section.flagged_ram, |r| {
        format!(
            "*RAM:* {:.1}Mi\t*Requests:* {:.1}Mi",
            r.ram_usage_mebibytes, r.ram_request_mebibytes
        )
    })));
}

fn lines(records: &[&WorkloadRecord], figures: impl Fn(&WorkloadRecord) -> String) -> String {
    if records.is_empty() {
        // Slack rejects empty text objects
        return "_nothing to report_".to_string();
    }

    records
        .iter()
        .map(|r| format!("*Ns:* {}\t*Pod:* {}\t{}", r.namespace, r.name, figures(r)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn markdown(text: String) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

fn context(text: String) -> Value {
    json!({ "type": "context", "elements": [{ "type": "mrkdwn", "text": text }] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample;
    use chrono::NaiveDate;

    fn texts(blocks: &[Value]) -> Vec<String> {
        blocks
            .iter()
            .filter(|b| b["type"] == "section")
            .filter_map(|b| b["text"]["text"].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_blocks_start_with_header_and_date() {
        let dcs = sample();
        let report = Report::build(&dcs, 5, false, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let blocks = blocks(&report);

        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[1]["type"], "context");
        assert_eq!(blocks[1]["elements"][0]["text"], "*03-01-2024* | pod-reporter");
    }

    #[test]
    fn test_one_datacenter_heading_per_section() {
        let dcs = sample();
        let report = Report::build(&dcs, 5, false, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let headings: Vec<_> = texts(&blocks(&report))
            .into_iter()
            .filter(|t| t.starts_with(":office:"))
            .collect();

        assert_eq!(
            headings,
            vec![":office: *Datacenter:* DC1", ":office: *Datacenter:* DC2"]
        );
    }

    #[test]
    fn test_top_heading_uses_clamped_count() {
        let dcs = sample();
        let report = Report::build(&dcs, 5, false, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let texts = texts(&blocks(&report));
        assert!(texts.contains(&"*Top 3 pods by CPU*".to_string()));
        assert!(texts.contains(&"*Top 1 pods by CPU*".to_string()));
    }

    #[test]
    fn test_lines_render_records() {
        let dcs = sample();
        let records: Vec<_> = dcs[1].records.iter().collect();

        let text = lines(&records, |r| format!("*CPU:* {:.1}m", r.cpu_usage_millicores));

        assert_eq!(text, "*Ns:* default\t*Pod:* db\t*CPU:* 1200.0m");
        assert_eq!(lines(&[], |_| String::new()), "_nothing to report_");
    }
}
