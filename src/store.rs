//! Persistence gateway: store validation, bulk idempotent upsert of
//! normalized rows, comparison-procedure invocation, and the active
//! subscriber lookup.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::QueryBuilder;
use tracing::{info, instrument};

use crate::normalization::NormalizedProduct;
use crate::util::db::Db;

/// Server-side routine that compares today's collected rows against our
/// bank's offerings. Its logic is opaque to the pipeline; only the result
/// shape (jsonb: null, object, or array of objects) is consumed here.
const COMPARISON_PROCEDURE: &str = "get_new_better_products_v3";

/// Minimal read-only probe against the target table. Run before any write
/// so unreachable-store and bad-credential failures are diagnosed before an
/// upsert is attempted.
#[instrument(skip(db))]
pub async fn validate_store(db: &Db, table: &str) -> Result<()> {
    sqlx::query(&format!("SELECT 1 FROM {table} LIMIT 1"))
        .persistent(false)
        .fetch_optional(&db.pool)
        .await
        .with_context(|| format!("store validation failed for table {table}"))?;
    info!(table, "store credential validation passed");
    Ok(())
}

/// Bulk upsert keyed on the natural identity of a product row. Re-running
/// the pipeline for the same `collected_at` overwrites instead of
/// duplicating. An empty input is a valid no-op returning 0.
#[instrument(skip(db, rows))]
pub async fn upsert_products(db: &Db, table: &str, rows: &[NormalizedProduct]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {table} (collected_at, product_type, fin_co_no, fin_prdt_cd, save_trm, \
         intr_rate_type, rsrv_type_nm, kor_co_nm, fin_prdt_nm, intr_rate, intr_rate2, \
         dcls_strt_day, spcl_cnd) "
    ));
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.collected_at)
            .push_bind(r.product_type.as_str())
            .push_bind(&r.fin_co_no)
            .push_bind(&r.fin_prdt_cd)
            .push_bind(r.save_trm)
            .push_bind(&r.intr_rate_type)
            .push_bind(&r.rsrv_type_nm)
            .push_bind(&r.kor_co_nm)
            .push_bind(&r.fin_prdt_nm)
            .push_bind(r.intr_rate)
            .push_bind(r.intr_rate2)
            .push_bind(&r.dcls_strt_day)
            .push_bind(&r.spcl_cnd);
    });
    qb.push(
        " ON CONFLICT (collected_at, fin_co_no, fin_prdt_cd, save_trm, intr_rate_type)
          DO UPDATE SET product_type = EXCLUDED.product_type,
                        rsrv_type_nm = EXCLUDED.rsrv_type_nm,
                        kor_co_nm = EXCLUDED.kor_co_nm,
                        fin_prdt_nm = EXCLUDED.fin_prdt_nm,
                        intr_rate = EXCLUDED.intr_rate,
                        intr_rate2 = EXCLUDED.intr_rate2,
                        dcls_strt_day = EXCLUDED.dcls_strt_day,
                        spcl_cnd = EXCLUDED.spcl_cnd",
    );
    let affected = qb
        .build()
        .persistent(false)
        .execute(&db.pool)
        .await
        .context("bulk upsert failed")?
        .rows_affected();
    info!(table, affected, "upserted product rows");
    Ok(affected)
}

/// Invoke the server-side comparison routine. SQL NULL decodes to `None`
/// and is the sole skip condition downstream; an empty array or object is
/// a present (non-null) result.
#[instrument(skip(db))]
pub async fn run_comparison(db: &Db) -> Result<Option<Value>> {
    let result: Option<Value> =
        sqlx::query_scalar(&format!("SELECT {COMPARISON_PROCEDURE}()"))
            .persistent(false)
            .fetch_one(&db.pool)
            .await
            .with_context(|| format!("procedure {COMPARISON_PROCEDURE} failed"))?;
    info!(
        procedure = COMPARISON_PROCEDURE,
        has_result = result.is_some(),
        "executed comparison procedure"
    );
    Ok(result)
}

/// Active subscriber addresses. The recipient list is owned by an external
/// system; this is a read-only lookup.
#[instrument(skip(db))]
pub async fn active_recipients(db: &Db) -> Result<Vec<String>> {
    let rows: Vec<Option<String>> =
        sqlx::query_scalar("SELECT email FROM user_emails WHERE is_active = TRUE")
            .persistent(false)
            .fetch_all(&db.pool)
            .await
            .context("recipient lookup failed")?;
    Ok(rows
        .into_iter()
        .flatten()
        .filter(|e| !e.trim().is_empty())
        .collect())
}
