//! Stage wiring for a single pipeline run.
//!
//! Stages run as a linear chain; the only fan-out is the pair of endpoint
//! probes/fetches, which run concurrently and must both complete before
//! normalization starts. Any stage failure halts forward progress; the
//! keyed upsert makes a whole-run retry safe, so there is no compensating
//! rollback.

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::info;

use crate::config::PipelineConfig;
use crate::finlife::provider::{FinlifeProvider, ProductEndpoint};
use crate::normalization::{normalize, ProductType};
use crate::notify::{render_bodies, Mailer};
use crate::store;
use crate::util::db::Db;

/// Tagged shape of the comparison procedure's result, replacing runtime
/// type inspection with explicit rendering rules per variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOutcome {
    /// SQL NULL: no improved offers found.
    Empty,
    /// Array of records, possibly zero-length.
    Rows(Vec<Map<String, Value>>),
    /// A single structured record.
    Single(Map<String, Value>),
    /// Anything else, rendered preformatted rather than tabular.
    Opaque(String),
}

impl ComparisonOutcome {
    pub fn classify(result: Option<Value>) -> Self {
        match result {
            None | Some(Value::Null) => ComparisonOutcome::Empty,
            Some(Value::Array(items)) => {
                let records: Option<Vec<Map<String, Value>>> = items
                    .iter()
                    .map(|v| v.as_object().cloned())
                    .collect();
                match records {
                    Some(records) => ComparisonOutcome::Rows(records),
                    // Mixed/non-object arrays do not fit a table.
                    None => ComparisonOutcome::Opaque(Value::Array(items).to_string()),
                }
            }
            Some(Value::Object(record)) => ComparisonOutcome::Single(record),
            Some(Value::String(s)) => ComparisonOutcome::Opaque(s),
            Some(other) => ComparisonOutcome::Opaque(other.to_string()),
        }
    }

    /// Only an absent (null) result skips notification. An empty list or
    /// mapping still notifies, rendered as a zero-row report.
    pub fn decision(&self) -> Decision {
        match self {
            ComparisonOutcome::Empty => Decision::Skip,
            _ => Decision::Notify,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Notify,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    pub normalized: usize,
    pub upserted: u64,
    pub decision: Decision,
    pub emails_sent: usize,
}

/// Pipeline-run date: today in KST (the source publishes on Korean time).
pub fn kst_today() -> NaiveDate {
    let kst = FixedOffset::east_opt(9 * 3600).expect("valid KST offset");
    Utc::now().with_timezone(&kst).date_naive()
}

/// One full pass: availability check -> fetch -> normalize/merge ->
/// validate -> upsert -> compare -> branch -> notify.
pub async fn run(cfg: &PipelineConfig, db: &Db, run_date: NaiveDate) -> Result<RunSummary> {
    let provider = FinlifeProvider::new(cfg.fin_api_key.clone())?;

    let (deposit_url, saving_url) = tokio::try_join!(
        provider.wait_until_available(ProductEndpoint::Deposit),
        provider.wait_until_available(ProductEndpoint::Saving),
    )
    .context("availability check failed")?;

    let (deposit_payload, saving_payload) = tokio::try_join!(
        provider.fetch(&deposit_url),
        provider.fetch(&saving_url),
    )
    .context("fetch failed")?;

    let mut rows = normalize(&deposit_payload, ProductType::Deposit, run_date);
    rows.extend(normalize(&saving_payload, ProductType::Saving, run_date));
    info!(rows = rows.len(), %run_date, "normalized product rows");

    // Credential/store validation must precede the upsert so failures are
    // diagnosed precisely.
    store::validate_store(db, &cfg.table_name).await?;
    let upserted = store::upsert_products(db, &cfg.table_name, &rows).await?;

    let outcome = ComparisonOutcome::classify(store::run_comparison(db).await?);
    let decision = outcome.decision();

    let emails_sent = match decision {
        Decision::Skip => {
            info!("comparison returned no result; skipping notification");
            0
        }
        Decision::Notify => {
            let recipients = store::active_recipients(db).await?;
            if recipients.is_empty() {
                info!("no active recipients; nothing to send");
                0
            } else {
                let (text, html) = render_bodies(&outcome);
                let mailer = Mailer::connect(&cfg.smtp)?;
                mailer.send_report(&recipients, &text, &html).await
            }
        }
    };

    Ok(RunSummary {
        run_date,
        normalized: rows.len(),
        upserted,
        decision,
        emails_sent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_result_skips() {
        assert_eq!(ComparisonOutcome::classify(None), ComparisonOutcome::Empty);
        assert_eq!(
            ComparisonOutcome::classify(Some(Value::Null)),
            ComparisonOutcome::Empty
        );
        assert_eq!(ComparisonOutcome::Empty.decision(), Decision::Skip);
    }

    #[test]
    fn empty_array_still_notifies() {
        let outcome = ComparisonOutcome::classify(Some(json!([])));
        assert_eq!(outcome, ComparisonOutcome::Rows(Vec::new()));
        assert_eq!(outcome.decision(), Decision::Notify);
    }

    #[test]
    fn array_of_records_notifies_as_rows() {
        let outcome = ComparisonOutcome::classify(Some(json!([
            {"상품 타입": "DEPOSIT", "최대 금리차": 0.4}
        ])));
        match &outcome {
            ComparisonOutcome::Rows(rows) => assert_eq!(rows.len(), 1),
            other => panic!("expected Rows, got {other:?}"),
        }
        assert_eq!(outcome.decision(), Decision::Notify);
    }

    #[test]
    fn object_notifies_as_single_record() {
        let outcome = ComparisonOutcome::classify(Some(json!({"상품 타입": "SAVING"})));
        assert!(matches!(outcome, ComparisonOutcome::Single(_)));
        assert_eq!(outcome.decision(), Decision::Notify);
    }

    #[test]
    fn scalars_and_mixed_arrays_are_opaque() {
        assert_eq!(
            ComparisonOutcome::classify(Some(json!("3 new products"))),
            ComparisonOutcome::Opaque("3 new products".to_string())
        );
        assert_eq!(
            ComparisonOutcome::classify(Some(json!(7))),
            ComparisonOutcome::Opaque("7".to_string())
        );
        let mixed = ComparisonOutcome::classify(Some(json!([1, {"a": 2}])));
        assert!(matches!(mixed, ComparisonOutcome::Opaque(_)));
        assert_eq!(mixed.decision(), Decision::Notify);
    }
}
