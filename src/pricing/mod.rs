//! Per-model token pricing.
//!
//! Rates are dollars per 1,000,000 tokens. The built-in table covers the
//! Gemini models the simulator ships with; an optional JSON file of the form
//! `{"models": {"<model>": {"input": .., "output": .., "cached": ..}}}` is
//! merged over it at startup.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Model whose rates apply when a lookup finds nothing.
pub const DEFAULT_PRICING_MODEL: &str = "gemini-2.5-flash-lite";

/// Cached-token rate as a fraction of the input rate when a model does not
/// price cached tokens explicitly.
pub const CACHED_RATE_FACTOR: f64 = 0.25;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

const BUILTIN_RATES: &[(&str, PricingRate)] = &[
    (
        "gemini-2.5-flash-lite-preview-09-2025",
        PricingRate::new(0.10, 0.40, Some(0.025)),
    ),
    (
        "gemini-2.5-flash-lite",
        PricingRate::new(0.10, 0.40, Some(0.025)),
    ),
    (
        "gemini-3.1-pro-preview",
        PricingRate::new(2.00, 12.00, Some(0.50)),
    ),
    ("gemini-2.5-pro", PricingRate::new(1.25, 10.00, Some(0.3125))),
    (
        "gemini-2.0-flash-lite-001",
        PricingRate::new(0.075, 0.30, Some(0.01875)),
    ),
];

/// Rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingRate {
    /// Dollars per 1M uncached input tokens.
    pub input: f64,
    /// Dollars per 1M output tokens.
    pub output: f64,
    /// Dollars per 1M cached input tokens. Defaults to a quarter of `input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<f64>,
}

impl PricingRate {
    pub const fn new(input: f64, output: f64, cached: Option<f64>) -> Self {
        Self {
            input,
            output,
            cached,
        }
    }

    pub fn cached_rate(&self) -> f64 {
        self.cached.unwrap_or(self.input * CACHED_RATE_FACTOR)
    }

    /// Dollar cost of a call at full precision.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> f64 {
        (input_tokens as f64 / TOKENS_PER_UNIT) * self.input
            + (output_tokens as f64 / TOKENS_PER_UNIT) * self.output
            + (cached_tokens as f64 / TOKENS_PER_UNIT) * self.cached_rate()
    }
}

/// How a model id was resolved against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMatch {
    /// The normalized id is a table key.
    Exact,
    /// A table key is a substring of the normalized id.
    Partial,
    /// Nothing matched; the default model's rates were used.
    Default,
}

impl PricingMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Partial => "partial",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for PricingMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a pricing lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingLookup<'a> {
    /// Table key whose rates were used.
    pub key: &'a str,
    pub rate: PricingRate,
    pub matched: PricingMatch,
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Failed to read pricing file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to parse pricing file {1}: {0}")]
    Parse(serde_json::Error, PathBuf),
}

#[derive(Debug, Deserialize)]
struct PricingFile {
    #[serde(default)]
    models: HashMap<String, PricingRate>,
}

/// Strip any `namespace/` prefix from a model id.
///
/// `models/gemini-2.5-pro` and `google/gemini-2.5-pro` both normalize to
/// `gemini-2.5-pro`.
pub fn normalize_model_id(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id).trim()
}

/// Model id to rate mapping with a guaranteed fallback.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: BTreeMap<String, PricingRate>,
    default_model: String,
    default_rate: PricingRate,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    /// Table containing only the built-in rates.
    pub fn builtin() -> Self {
        let rates: BTreeMap<String, PricingRate> = BUILTIN_RATES
            .iter()
            .map(|(model, rate)| ((*model).to_string(), *rate))
            .collect();
        let default_rate = rates
            .get(DEFAULT_PRICING_MODEL)
            .copied()
            .unwrap_or(PricingRate::new(0.10, 0.40, None));

        Self {
            rates,
            default_model: DEFAULT_PRICING_MODEL.to_string(),
            default_rate,
        }
    }

    /// Build the table from configuration, merging the override file when one
    /// is configured. A missing or unreadable file leaves the built-ins in force.
    pub fn from_config(config: &crate::config::UsageConfig) -> Self {
        let mut table = Self::builtin();

        if let Some(path) = &config.pricing_file {
            match table.load_overrides(path) {
                Ok(count) => {
                    tracing::info!(path = %path.display(), models = count, "Loaded pricing overrides");
                }
                Err(PricingError::Io(e, path)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "No pricing override file, using built-in rates");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring pricing override file");
                }
            }
        }

        if let Some(model) = &config.default_pricing_model {
            table.set_default_model(model);
        }

        table
    }

    /// Merge rates over the table. Existing entries are replaced.
    pub fn merge(&mut self, overrides: impl IntoIterator<Item = (String, PricingRate)>) {
        for (model, rate) in overrides {
            self.rates.insert(normalize_model_id(&model).to_string(), rate);
        }
        if let Some(rate) = self.rates.get(&self.default_model) {
            self.default_rate = *rate;
        }
    }

    /// Read a pricing JSON file and merge it. Returns the number of models read.
    pub fn load_overrides(&mut self, path: impl AsRef<Path>) -> Result<usize, PricingError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| PricingError::Io(e, path.to_path_buf()))?;
        let file: PricingFile =
            serde_json::from_str(&contents).map_err(|e| PricingError::Parse(e, path.to_path_buf()))?;

        let count = file.models.len();
        self.merge(file.models);
        Ok(count)
    }

    /// Change the fallback model. Unknown models are rejected with a warning
    /// and the current fallback is kept.
    pub fn set_default_model(&mut self, model: &str) -> bool {
        let model = normalize_model_id(model);
        match self.rates.get(model) {
            Some(rate) => {
                self.default_rate = *rate;
                self.default_model = model.to_string();
                true
            }
            None => {
                tracing::warn!(
                    model,
                    fallback = %self.default_model,
                    "Default pricing model is not in the pricing table"
                );
                false
            }
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn get(&self, model: &str) -> Option<&PricingRate> {
        self.rates.get(model)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PricingRate)> {
        self.rates.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve rates for a model id.
    ///
    /// Order: exact key, then the longest key contained in the id (ties go to
    /// the lexicographically first key), then the default model.
    pub fn lookup(&self, model_id: &str) -> PricingLookup<'_> {
        let normalized = normalize_model_id(model_id);

        if let Some((key, rate)) = self.rates.get_key_value(normalized) {
            return PricingLookup {
                key,
                rate: *rate,
                matched: PricingMatch::Exact,
            };
        }

        let partial = self
            .rates
            .iter()
            .filter(|(key, _)| !key.is_empty() && normalized.contains(key.as_str()))
            .fold(None::<(&String, &PricingRate)>, |best, candidate| match best {
                Some(b) if b.0.len() >= candidate.0.len() => Some(b),
                _ => Some(candidate),
            });

        if let Some((key, rate)) = partial {
            return PricingLookup {
                key,
                rate: *rate,
                matched: PricingMatch::Partial,
            };
        }

        PricingLookup {
            key: &self.default_model,
            rate: self.default_rate,
            matched: PricingMatch::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    #[test]
    fn test_builtin_table() {
        let table = PricingTable::builtin();
        assert_eq!(table.len(), 5);
        assert_eq!(table.default_model(), DEFAULT_PRICING_MODEL);

        let pro = table.get("gemini-2.5-pro").unwrap();
        assert_eq!(pro.input, 1.25);
        assert_eq!(pro.output, 10.00);
        assert_eq!(pro.cached_rate(), 0.3125);
    }

    #[rstest]
    #[case("gemini-2.5-pro", "gemini-2.5-pro")]
    #[case("models/gemini-2.5-pro", "gemini-2.5-pro")]
    #[case("google/gemini-2.5-pro", "gemini-2.5-pro")]
    #[case("projects/p/locations/l/models/gemini-2.5-pro", "gemini-2.5-pro")]
    fn test_normalize_model_id(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_model_id(input), expected);
    }

    #[test]
    fn test_cached_rate_defaults_to_quarter_of_input() {
        let rate = PricingRate::new(2.0, 8.0, None);
        assert_eq!(rate.cached_rate(), 0.5);
    }

    #[test]
    fn test_cost_formula() {
        let rate = PricingRate::new(0.075, 0.30, Some(0.01875));
        // 0.1 * 0.075 + 0.05 * 0.30 + 1.0 * 0.01875 = 0.0075 + 0.015 + 0.01875
        let cost = rate.cost(100_000, 50_000, 1_000_000);
        assert!((cost - 0.04125).abs() < 1e-12);
    }

    #[rstest]
    #[case("gemini-2.5-pro", "gemini-2.5-pro", PricingMatch::Exact)]
    #[case("models/gemini-2.5-flash-lite", "gemini-2.5-flash-lite", PricingMatch::Exact)]
    #[case("gemini-2.5-pro-exp-0827", "gemini-2.5-pro", PricingMatch::Partial)]
    // Both flash-lite keys are contained; the longer one wins.
    #[case(
        "gemini-2.5-flash-lite-preview-09-2025-tuned",
        "gemini-2.5-flash-lite-preview-09-2025",
        PricingMatch::Partial
    )]
    #[case("gpt-4o-mini", DEFAULT_PRICING_MODEL, PricingMatch::Default)]
    fn test_lookup(#[case] model: &str, #[case] key: &str, #[case] matched: PricingMatch) {
        let table = PricingTable::builtin();
        let lookup = table.lookup(model);
        assert_eq!(lookup.key, key);
        assert_eq!(lookup.matched, matched);
    }

    #[test]
    fn test_unknown_model_uses_default_rates() {
        let table = PricingTable::builtin();
        let lookup = table.lookup("some-unreleased-model");
        // 1.0 * 0.10 + 1.0 * 0.40
        assert_eq!(lookup.rate.cost(1_000_000, 1_000_000, 0), 0.5);
    }

    #[test]
    fn test_load_overrides_merges_over_builtins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"models": {{
                "gemini-2.5-pro": {{"input": 1.0, "output": 9.0}},
                "custom-model": {{"input": 3.0, "output": 4.0, "cached": 0.1}}
            }}}}"#
        )
        .unwrap();

        let mut table = PricingTable::builtin();
        let count = table.load_overrides(file.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(table.len(), 6);

        let pro = table.get("gemini-2.5-pro").unwrap();
        assert_eq!(pro.input, 1.0);
        assert_eq!(pro.cached, None);
        assert_eq!(pro.cached_rate(), 0.25);
        assert_eq!(table.get("custom-model").unwrap().cached_rate(), 0.1);
        // Untouched built-ins survive.
        assert!(table.get("gemini-2.0-flash-lite-001").is_some());
    }

    #[test]
    fn test_load_overrides_errors() {
        let mut table = PricingTable::builtin();

        let missing = table.load_overrides("/nonexistent/pricing.json");
        assert!(matches!(missing, Err(PricingError::Io(_, _))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let malformed = table.load_overrides(file.path());
        assert!(matches!(malformed, Err(PricingError::Parse(_, _))));

        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_set_default_model() {
        let mut table = PricingTable::builtin();
        assert!(table.set_default_model("models/gemini-2.5-pro"));
        assert_eq!(table.lookup("unknown").rate.input, 1.25);

        assert!(!table.set_default_model("not-a-model"));
        assert_eq!(table.default_model(), "gemini-2.5-pro");
    }

    #[test]
    fn test_merge_refreshes_default_rate() {
        let mut table = PricingTable::builtin();
        table.merge([(
            DEFAULT_PRICING_MODEL.to_string(),
            PricingRate::new(0.2, 0.8, None),
        )]);
        let lookup = table.lookup("unknown");
        assert_eq!(lookup.matched, PricingMatch::Default);
        assert_eq!(lookup.rate.input, 0.2);
    }
}
