//! Normalization of finlife product payloads into the canonical row shape.
//!
//! Each endpoint returns two related sections under `result`: `baseList`
//! (per-product attributes) and `optionList` (per rate-tier attributes).
//! They are merged with left-join semantics on the product code: a base
//! record always survives, and a base record with several rate tiers fans
//! out into one row per tier.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Substituted when a product carries no special-condition text.
pub const NO_SPECIAL_CONDITION: &str = "해당사항 없음";

/// Substituted when the source omits the reserve-type label entirely
/// (deposit products have no reserve type).
pub const RESERVE_TYPE_FALLBACK: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProductType {
    Deposit,
    Saving,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Deposit => "DEPOSIT",
            ProductType::Saving => "SAVING",
        }
    }
}

/// Canonical row, one per (product code x rate-tier variant). Every field
/// is always present; missing upstream data is defaulted deterministically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedProduct {
    pub collected_at: NaiveDate,
    pub product_type: ProductType,
    pub fin_co_no: String,
    pub fin_prdt_cd: String,
    pub save_trm: i32,
    pub intr_rate_type: String,
    pub rsrv_type_nm: String,
    pub kor_co_nm: String,
    pub fin_prdt_nm: String,
    /// None means "no value": the source field was absent or unparseable.
    /// A coercion failure must not masquerade as a real 0% rate.
    pub intr_rate: Option<f64>,
    pub intr_rate2: Option<f64>,
    pub dcls_strt_day: String,
    pub spcl_cnd: String,
}

/// Merge one endpoint payload into canonical rows.
///
/// An empty `baseList` or `optionList` is a valid upstream state (an empty
/// category that day) and yields zero rows without error.
pub fn normalize(payload: &Value, product_type: ProductType, run_date: NaiveDate) -> Vec<NormalizedProduct> {
    let base_list = section(payload, "baseList");
    let option_list = section(payload, "optionList");

    if base_list.is_empty() || option_list.is_empty() {
        info!(
            product_type = product_type.as_str(),
            "no collected data for this category"
        );
        return Vec::new();
    }

    // Index option records by product code, preserving payload order so
    // fan-out rows come out in a stable order.
    let mut options_by_code: HashMap<&str, Vec<&Value>> = HashMap::new();
    for opt in &option_list {
        if let Some(code) = opt.get("fin_prdt_cd").and_then(Value::as_str) {
            options_by_code.entry(code).or_default().push(opt);
        }
    }

    let mut rows = Vec::with_capacity(base_list.len());
    for base in &base_list {
        let code = text_field(base, "fin_prdt_cd").unwrap_or_default();
        match options_by_code.get(code.as_str()) {
            Some(opts) => {
                for opt in opts {
                    rows.push(build_row(base, Some(opt), product_type, run_date));
                }
            }
            // Left join: a base record without a matching option record is
            // retained with option-derived fields defaulted, never dropped.
            None => rows.push(build_row(base, None, product_type, run_date)),
        }
    }
    rows
}

fn build_row(
    base: &Value,
    option: Option<&Value>,
    product_type: ProductType,
    run_date: NaiveDate,
) -> NormalizedProduct {
    NormalizedProduct {
        collected_at: run_date,
        product_type,
        fin_co_no: text_field(base, "fin_co_no").unwrap_or_default(),
        fin_prdt_cd: text_field(base, "fin_prdt_cd").unwrap_or_default(),
        save_trm: option.and_then(|o| int_field(o, "save_trm")).unwrap_or(0),
        intr_rate_type: option
            .and_then(|o| text_field(o, "intr_rate_type"))
            .unwrap_or_default(),
        rsrv_type_nm: option
            .and_then(|o| text_field(o, "rsrv_type_nm"))
            .unwrap_or_else(|| RESERVE_TYPE_FALLBACK.to_string()),
        kor_co_nm: text_field(base, "kor_co_nm").unwrap_or_default(),
        fin_prdt_nm: text_field(base, "fin_prdt_nm").unwrap_or_default(),
        intr_rate: option.and_then(|o| rate_field(o, "intr_rate")),
        intr_rate2: option.and_then(|o| rate_field(o, "intr_rate2")),
        dcls_strt_day: text_field(base, "dcls_strt_day").unwrap_or_default(),
        spcl_cnd: text_field(base, "spcl_cnd")
            .unwrap_or_else(|| NO_SPECIAL_CONDITION.to_string()),
    }
}

fn section<'a>(payload: &'a Value, key: &str) -> Vec<&'a Value> {
    payload
        .get("result")
        .and_then(|r| r.get(key))
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

/// String projection of a scalar field. Null and absent are both "missing".
fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Numeric coercion for rates: accepts numbers and numeric strings;
/// anything else is "no value".
fn rate_field(record: &Value, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integer coercion for the month term; the caller defaults it to 0.
fn int_field(record: &Value, key: &str) -> Option<i32> {
    match record.get(key)? {
        Value::Number(n) => n.as_i64().map(|v| v as i32),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}
