use anyhow::Context;
use serde::Deserialize;

/// Circulation rules, sourced from CIRCULATION_* environment variables
/// with library defaults
#[derive(Debug, Clone, Deserialize)]
pub struct CirculationPolicy {
    pub loan_period_days: i64,
    pub renewal_period_days: i64,
    pub max_renewals: i32,
    pub max_active_loans: i64,
    pub hold_period_hours: i64,
    pub hold_sweep_seconds: u64,
}

impl Default for CirculationPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            renewal_period_days: 7,
            max_renewals: 1,
            max_active_loans: 5,
            hold_period_hours: 48,
            hold_sweep_seconds: 60,
        }
    }
}

impl CirculationPolicy {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = CirculationPolicy::default();
        let settings = config::Config::builder()
            .set_default("loan_period_days", defaults.loan_period_days)?
            .set_default("renewal_period_days", defaults.renewal_period_days)?
            .set_default("max_renewals", defaults.max_renewals as i64)?
            .set_default("max_active_loans", defaults.max_active_loans)?
            .set_default("hold_period_hours", defaults.hold_period_hours)?
            .set_default("hold_sweep_seconds", defaults.hold_sweep_seconds as i64)?
            .add_source(config::Environment::with_prefix("CIRCULATION"))
            .build()
            .context("Failed to load circulation policy")?;

        settings
            .try_deserialize()
            .context("Invalid circulation policy")
    }

    pub fn due_at(&self, borrowed_at: i64) -> i64 {
        borrowed_at + chrono::Duration::days(self.loan_period_days).num_seconds()
    }

    pub fn renewal_extension_seconds(&self) -> i64 {
        chrono::Duration::days(self.renewal_period_days).num_seconds()
    }

    pub fn hold_deadline(&self, promoted_at: i64) -> i64 {
        promoted_at + chrono::Duration::hours(self.hold_period_hours).num_seconds()
    }
}

pub fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
