use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::{AppError, ReportSettings, AVERAGE_HISTORY};
use crate::domain::{BranchId, BranchRules, Money, OverrideTable, PnlRules, RawMaterialRule};

/// Per-branch settings. Anything left out keeps the branch's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    pub id: BranchId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub raw_material: Option<RawMaterialRule>,
    #[serde(default)]
    pub specialty_purchases: Option<bool>,
}

/// Business rules and report settings, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub local_currency: String,
    pub fx_currency: String,
    pub fx_lookback_months: usize,
    pub history_months: usize,
    pub overhead_per_month: Money,
    pub branches: Vec<BranchConfig>,
    pub overrides: OverrideTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_currency: "TRY".to_string(),
            fx_currency: "USD".to_string(),
            fx_lookback_months: 9,
            history_months: AVERAGE_HISTORY,
            overhead_per_month: Decimal::new(350_000, 0),
            branches: Vec::new(),
            overrides: OverrideTable::default(),
        }
    }
}

impl Config {
    /// Read the config file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), overrides = config.overrides.rules().len(), "Loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.local_currency.trim().is_empty() || self.fx_currency.trim().is_empty() {
            return Err(AppError::Config("currency codes must not be empty".to_string()));
        }
        if self.fx_lookback_months == 0 {
            return Err(AppError::Config("fx_lookback_months must be at least 1".to_string()));
        }
        if self.history_months == 0 {
            return Err(AppError::Config("history_months must be at least 1".to_string()));
        }
        if self.overhead_per_month.is_sign_negative() {
            return Err(AppError::Config("overhead_per_month must not be negative".to_string()));
        }
        for (i, branch) in self.branches.iter().enumerate() {
            if self.branches[..i].iter().any(|b| b.id == branch.id) {
                return Err(AppError::Config(format!("branch {} configured twice", branch.id)));
            }
            if let Some(RawMaterialRule::Markup { factor }) = branch.raw_material {
                if factor <= Decimal::ZERO {
                    return Err(AppError::Config(format!(
                        "branch {} markup factor must be positive",
                        branch.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_pnl_rules(&self) -> PnlRules {
        let mut branches: BTreeMap<BranchId, BranchRules> = BranchId::ALL
            .into_iter()
            .map(|b| (b, BranchRules::default_for(b)))
            .collect();
        for branch in &self.branches {
            let rules = branches
                .entry(branch.id)
                .or_insert_with(|| BranchRules::default_for(branch.id));
            if let Some(rule) = branch.raw_material {
                rules.raw_material = rule;
            }
            if let Some(specialty) = branch.specialty_purchases {
                rules.specialty_purchases = specialty;
            }
        }

        PnlRules {
            overhead: self.overhead_per_month,
            branches,
            overrides: self.overrides.clone(),
        }
    }

    pub fn to_report_settings(&self) -> ReportSettings {
        ReportSettings {
            local_currency: self.local_currency.to_uppercase(),
            fx_currency: self.fx_currency.to_uppercase(),
            fx_lookback_months: self.fx_lookback_months,
            history_months: self.history_months,
            branch_names: self
                .branches
                .iter()
                .filter_map(|b| b.name.clone().map(|name| (b.id, name)))
                .collect(),
        }
    }
}
