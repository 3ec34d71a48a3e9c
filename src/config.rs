//! Run configuration built once at startup and passed by reference into
//! every stage. All required values are validated here, before any network
//! call, so a missing credential fails the run immediately with a precise
//! diagnosis instead of surfacing mid-pipeline.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::util::env::{db_url, env_opt, env_parse, env_req, redact_value};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// finlife open-API auth key (FIN_API).
    pub fin_api_key: String,
    /// Postgres DSN for the shared store.
    pub database_url: String,
    /// Destination table for normalized product rows.
    pub table_name: String,
    pub smtp: SmtpConfig,
}

impl PipelineConfig {
    /// Build and eagerly validate the full configuration from the
    /// environment. SMTP settings are validated here too, even though a run
    /// may end up skipping the notification stage: a broken mail setup
    /// should fail the run at startup, not after the upsert.
    pub fn from_env() -> Result<Self> {
        let fin_api_key = env_req("FIN_API").context("source fetcher configuration")?;
        let database_url = db_url().context("persistence configuration")?;

        let table_name = env_opt("SUPABASE_TABLE").unwrap_or_else(|| "finance_data".to_string());
        validate_table_name(&table_name)?;

        let user = env_req("SMTP_USER").context("notifier configuration")?;
        let smtp = SmtpConfig {
            host: env_req("SMTP_HOST").context("notifier configuration")?,
            port: env_parse("SMTP_PORT", 587u16),
            password: env_req("SMTP_PASSWORD").context("notifier configuration")?,
            from: env_opt("SMTP_FROM").unwrap_or_else(|| user.clone()),
            user,
        };

        let cfg = Self {
            fin_api_key,
            database_url,
            table_name,
            smtp,
        };
        cfg.log_snapshot();
        Ok(cfg)
    }

    /// Log a redacted snapshot so a failed run can be diagnosed from the
    /// log stream without exposing credentials.
    fn log_snapshot(&self) {
        let snapshot: Vec<(&str, String)> = vec![
            ("FIN_API", redact_value("FIN_API", &self.fin_api_key)),
            (
                "DATABASE_URL",
                redact_value("DATABASE_URL", &self.database_url),
            ),
            ("SUPABASE_TABLE", self.table_name.clone()),
            ("SMTP_HOST", self.smtp.host.clone()),
            ("SMTP_PORT", self.smtp.port.to_string()),
            ("SMTP_USER", self.smtp.user.clone()),
            (
                "SMTP_PASSWORD",
                redact_value("SMTP_PASSWORD", &self.smtp.password),
            ),
            ("SMTP_FROM", self.smtp.from.clone()),
        ];
        info!(target: "preflight", snapshot = ?snapshot, "configuration snapshot");
    }
}

// The table name is interpolated into SQL text (it cannot be bound), so it
// must be a plain identifier.
fn validate_table_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        bail!("invalid table name {name:?}: expected a plain SQL identifier");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_table_name("finance_data").is_ok());
        assert!(validate_table_name("finance_data_v2").is_ok());
    }

    #[test]
    fn rejects_injection_shaped_names() {
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("finance data").is_err());
        assert!(validate_table_name("t; DROP TABLE x").is_err());
        assert!(validate_table_name("1table").is_err());
    }
}
