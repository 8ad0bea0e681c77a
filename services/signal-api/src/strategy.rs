//! Strategy registry: timeframes and prompt templates per strategy key

use crate::analysis::TradeIdea;
use market_data::TimeFrame;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Critique prompt used when a strategy does not ship its own
pub const DEFAULT_CRITIQUE_TEMPLATE: &str = "\
You previously proposed a trade on {symbol} (current price {current_price}) \
after reviewing the {timeframes} charts.\n\
Original rationale: {rationale}\n\
Proposed trade:\n{trade_idea}\n\n\
The attached charts mark the entry, stop loss and take profit levels. \
Critically review the proposal. If it still holds, answer with the same JSON \
structure, adjusting levels if needed. If it does not hold, answer with \
{\"direction\": \"none\"}.";

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid strategy file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("strategy '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// One configured analysis strategy
#[derive(Debug, Clone)]
pub struct Strategy {
    pub key: String,
    pub name: String,
    pub description: String,
    /// Rendered in this order for every attempt
    pub timeframes: Vec<TimeFrame>,
    pub analysis_template: String,
    pub critique_template: String,
}

impl Strategy {
    fn timeframe_list(&self) -> String {
        self.timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Stage-one prompt
    pub fn analysis_prompt(&self, symbol: &str, price: Decimal) -> String {
        self.analysis_template
            .replace("{symbol}", symbol)
            .replace("{current_price}", &price.to_string())
            .replace("{timeframes}", &self.timeframe_list())
    }

    /// Self-validation prompt for `idea`
    pub fn critique_prompt(&self, symbol: &str, price: Decimal, idea: &TradeIdea) -> String {
        let serialized = serde_json::to_string_pretty(idea).unwrap_or_default();
        // {trade_idea} last: the serialized idea may itself contain braces
        self.critique_template
            .replace("{symbol}", symbol)
            .replace("{current_price}", &price.to_string())
            .replace("{timeframes}", &self.timeframe_list())
            .replace("{rationale}", &idea.analysis_summary)
            .replace("{trade_idea}", &serialized)
    }
}

#[derive(Debug, Deserialize)]
struct StrategyFile {
    strategies: BTreeMap<String, StrategyEntry>,
}

#[derive(Debug, Deserialize)]
struct StrategyEntry {
    name: String,
    #[serde(default)]
    description: String,
    timeframes: Vec<TimeFrame>,
    prompt_file: PathBuf,
    #[serde(default)]
    critique_prompt_file: Option<PathBuf>,
}

/// Strategies by key, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<Strategy>>,
}

impl StrategyRegistry {
    /// Load the registry file; prompt paths are relative to its directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StrategyError> {
        let path = path.as_ref();
        let raw = read(path)?;
        let file: StrategyFile = serde_json::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut strategies = Vec::with_capacity(file.strategies.len());
        for (key, entry) in file.strategies {
            if entry.timeframes.is_empty() {
                return Err(StrategyError::Invalid {
                    key,
                    reason: "no timeframes configured".to_string(),
                });
            }
            let analysis_template = read(&base.join(&entry.prompt_file))?;
            let critique_template = match &entry.critique_prompt_file {
                Some(file) => read(&base.join(file))?,
                None => DEFAULT_CRITIQUE_TEMPLATE.to_string(),
            };
            strategies.push(Strategy {
                key,
                name: entry.name,
                description: entry.description,
                timeframes: entry.timeframes,
                analysis_template,
                critique_template,
            });
        }

        tracing::info!("Loaded {} strategies from {}", strategies.len(), path.display());
        Ok(Self::from_strategies(strategies))
    }

    pub fn from_strategies(strategies: impl IntoIterator<Item = Strategy>) -> Self {
        Self {
            strategies: strategies
                .into_iter()
                .map(|s| (s.key.clone(), Arc::new(s)))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Strategy>> {
        self.strategies.get(key).cloned()
    }

    pub fn list(&self) -> impl Iterator<Item = &Arc<Strategy>> {
        self.strategies.values()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

fn read(path: &Path) -> Result<String, StrategyError> {
    std::fs::read_to_string(path).map_err(|source| StrategyError::Io {
        path: path.to_path_buf(),
        source,
    })
}
