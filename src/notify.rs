//! Report rendering and delivery for comparison results.
//!
//! The comparison procedure's rows arrive with Korean display labels; the
//! report keeps a fixed column order, drops free-text condition columns,
//! and is rendered both as aligned plain text and as an HTML table, each
//! ending with a link to the published dashboard.

use anyhow::{Context, Result};
use itertools::Itertools;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::orchestrator::ComparisonOutcome;

pub const SUBJECT: &str = "[Pipeline] New Better Products Result";

const DETAIL_URL: &str = "https://tech-semina-o9fy4ztqcxvobomlnzychy.streamlit.app/";

/// Fixed display order; columns not listed here are dropped from the
/// rendered report (they still exist in storage).
const DISPLAY_COLUMNS: [&str; 10] = [
    "상품 타입",
    "비교 우리 은행 상품",
    "저축 기간",
    "타행명",
    "타행 상품명",
    "우리은행 기본금리",
    "우리은행 최대금리",
    "타행 기본금리",
    "타행 최대금리",
    "최대 금리차",
];

/// Free-text condition columns excluded from the report regardless of the
/// input column order.
const EXCLUDED_COLUMNS: [&str; 3] = ["spcl_cnd", "우대 조건 상세", "우대조건 상세"];

/// Tabular projection of a comparison result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        // Column set: first-seen order across all records, minus exclusions.
        let present: Vec<String> = records
            .iter()
            .flat_map(|r| r.keys())
            .unique()
            .filter(|k| !EXCLUDED_COLUMNS.contains(&k.as_str()))
            .cloned()
            .collect();

        // Reorder to the fixed display order, keeping only columns actually
        // present. When none of the display columns match, keep the natural
        // filtered order instead of producing an empty table.
        let ordered: Vec<String> = DISPLAY_COLUMNS
            .iter()
            .filter(|c| present.iter().any(|p| p == *c))
            .map(|c| c.to_string())
            .collect();
        let columns = if ordered.is_empty() { present } else { ordered };

        let rows = records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| cell_text(r.get(c)))
                    .collect::<Vec<_>>()
            })
            .collect();

        Self { columns, rows }
    }

    fn to_text(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let mut out = String::new();
        let fmt_line = |cells: &[String], out: &mut String| {
            let line = cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{cell:<width$}", width = *w))
                .join("  ");
            out.push_str(line.trim_end());
            out.push('\n');
        };
        fmt_line(&self.columns, &mut out);
        for row in &self.rows {
            fmt_line(row, &mut out);
        }
        out
    }

    fn to_html(&self) -> String {
        let mut out = String::from("<table border=\"1\">\n<thead><tr>");
        for c in &self.columns {
            out.push_str(&format!("<th>{}</th>", html_escape(c)));
        }
        out.push_str("</tr></thead>\n<tbody>");
        for row in &self.rows {
            out.push_str("\n<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", html_escape(cell)));
            }
            out.push_str("</tr>");
        }
        out.push_str("\n</tbody>\n</table>");
        out
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn text_footer() -> String {
    format!("\n\n자세한 사항은 아래 링크를 통해 확인할 수 있습니다.\n{DETAIL_URL}")
}

fn html_footer() -> String {
    format!(
        "<p>자세한 사항은 아래 링크를 통해 확인할 수 있습니다.</p>\
         <p><a href=\"{DETAIL_URL}\">{DETAIL_URL}</a></p>"
    )
}

/// Render both message bodies for an outcome: plain text primary, HTML
/// alternative. A zero-row result still renders as a report (`Rows: 0`).
pub fn render_bodies(outcome: &ComparisonOutcome) -> (String, String) {
    match outcome {
        ComparisonOutcome::Rows(records) => render_table(&ReportTable::from_records(records)),
        ComparisonOutcome::Single(record) => {
            render_table(&ReportTable::from_records(std::slice::from_ref(record)))
        }
        ComparisonOutcome::Opaque(raw) => (
            format!("Result:\n{raw}{}", text_footer()),
            format!("<pre>{}</pre>{}", html_escape(raw), html_footer()),
        ),
        // The decision gate never routes an absent result here; render it
        // as an empty report if it happens anyway.
        ComparisonOutcome::Empty => render_table(&ReportTable {
            columns: Vec::new(),
            rows: Vec::new(),
        }),
    }
}

fn render_table(table: &ReportTable) -> (String, String) {
    let text = format!(
        "Rows: {}\n\n{}{}",
        table.rows.len(),
        table.to_text(),
        text_footer()
    );
    let html = format!(
        "<p>Rows: {}</p>{}{}",
        table.rows.len(),
        table.to_html(),
        html_footer()
    );
    (text, html)
}

/// SMTP delivery over a single authenticated STARTTLS session, one message
/// per recipient, sent serially so failures attribute cleanly.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn connect(cfg: &SmtpConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("smtp relay setup failed")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.user.clone(), cfg.password.clone()))
            .build();
        let from = cfg
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid SMTP_FROM address {:?}", cfg.from))?;
        Ok(Self { transport, from })
    }

    /// Deliver the report to every recipient. A failure for one recipient
    /// is logged and does not abort the batch; the return value is the
    /// number of messages actually dispatched.
    pub async fn send_report(&self, recipients: &[String], text: &str, html: &str) -> usize {
        let mut sent = 0usize;
        for recipient in recipients {
            let mailbox = match recipient.parse::<Mailbox>() {
                Ok(m) => m,
                Err(err) => {
                    error!(recipient = %recipient, error = %err, "malformed recipient address");
                    continue;
                }
            };
            let message = match Message::builder()
                .from(self.from.clone())
                .to(mailbox)
                .subject(SUBJECT)
                .multipart(MultiPart::alternative_plain_html(
                    text.to_string(),
                    html.to_string(),
                )) {
                Ok(m) => m,
                Err(err) => {
                    error!(recipient = %recipient, error = %err, "failed to build message");
                    continue;
                }
            };
            match self.transport.send(message).await {
                Ok(_) => sent += 1,
                Err(err) => error!(recipient = %recipient, error = %err, "failed to send report"),
            }
        }
        info!(sent, total = recipients.len(), "sent result emails");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn excluded_columns_never_render() {
        let records = vec![record(json!({
            "spcl_cnd": "비대면 가입 시",
            "우대 조건 상세": "급여이체",
            "타행명": "A은행",
        }))];
        let table = ReportTable::from_records(&records);
        assert_eq!(table.columns, vec!["타행명"]);
        let (text, html) = render_bodies(&ComparisonOutcome::Rows(records));
        assert!(!text.contains("spcl_cnd"));
        assert!(!text.contains("급여이체"));
        assert!(!html.contains("급여이체"));
    }

    #[test]
    fn display_order_wins_over_input_order() {
        let records = vec![record(json!({
            "최대 금리차": 0.4,
            "상품 타입": "DEPOSIT",
            "타행명": "B은행",
        }))];
        let table = ReportTable::from_records(&records);
        assert_eq!(table.columns, vec!["상품 타입", "타행명", "최대 금리차"]);
    }

    #[test]
    fn unknown_columns_dropped_when_display_columns_present() {
        let records = vec![record(json!({
            "상품 타입": "DEPOSIT",
            "internal_id": 42,
        }))];
        let table = ReportTable::from_records(&records);
        assert_eq!(table.columns, vec!["상품 타입"]);
    }

    #[test]
    fn natural_order_kept_when_no_display_columns_match() {
        let records = vec![record(json!({"b": 1, "a": 2}))];
        let table = ReportTable::from_records(&records);
        assert_eq!(table.columns, vec!["b", "a"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn zero_row_result_renders_as_empty_report() {
        let (text, html) = render_bodies(&ComparisonOutcome::Rows(Vec::new()));
        assert!(text.starts_with("Rows: 0"));
        assert!(html.starts_with("<p>Rows: 0</p>"));
        assert!(text.contains(DETAIL_URL));
    }

    #[test]
    fn single_record_renders_one_row() {
        let outcome = ComparisonOutcome::Single(record(json!({
            "상품 타입": "SAVING",
            "최대 금리차": 0.25,
        })));
        let (text, html) = render_bodies(&outcome);
        assert!(text.starts_with("Rows: 1"));
        assert!(text.contains("SAVING"));
        assert!(html.contains("<td>0.25</td>"));
    }

    #[test]
    fn opaque_result_renders_preformatted() {
        let outcome = ComparisonOutcome::Opaque("3 better products".to_string());
        let (text, html) = render_bodies(&outcome);
        assert!(text.starts_with("Result:\n3 better products"));
        assert!(html.starts_with("<pre>3 better products</pre>"));
    }

    #[test]
    fn html_cells_are_escaped() {
        let records = vec![record(json!({"타행명": "<script>&"}))];
        let (_, html) = render_bodies(&ComparisonOutcome::Rows(records));
        assert!(html.contains("&lt;script&gt;&amp;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn text_table_is_column_aligned() {
        let records = vec![
            record(json!({"타행명": "가나다은행", "최대 금리차": 0.4})),
            record(json!({"타행명": "A", "최대 금리차": 1.15})),
        ];
        let table = ReportTable::from_records(&records);
        let text = table.to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("타행명"));
    }

    #[test]
    fn footers_carry_detail_link() {
        assert!(text_footer().contains(DETAIL_URL));
        assert!(html_footer().contains(&format!("href=\"{DETAIL_URL}\"")));
    }
}
