// =============================================================================
// Settings — engine configuration with serde defaults and env overrides
// =============================================================================
//
// Every field carries a serde default so an older or partial JSON file still
// loads. `main` applies env overrides after loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_pairs() -> Vec<String> {
    vec!["KRW-DOGE".to_string()]
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_chart_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_paper_balance() -> f64 {
    1_000_000.0 // KRW
}

fn default_quote_currency() -> String {
    "KRW".to_string()
}

fn default_rest_url() -> String {
    "https://api.upbit.com".to_string()
}

fn default_ws_url() -> String {
    "wss://api.upbit.com/websocket/v1".to_string()
}

/// Engine settings, loaded from JSON with env overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pairs to stream and trade. The first pair drives the strategy.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,

    /// Strategy bar interval label (e.g. "1m", "4h").
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Bind address for the chart data API; empty disables it.
    #[serde(default = "default_chart_addr")]
    pub chart_addr: String,

    /// Paper account starting balance, in `quote_currency`.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,

    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,

    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pairs: default_pairs(),
            timeframe: default_timeframe(),
            chart_addr: default_chart_addr(),
            paper_balance: default_paper_balance(),
            quote_currency: default_quote_currency(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing files are an error so the
    /// caller can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        info!(
            path = %path.display(),
            pairs = ?settings.pairs,
            timeframe = %settings.timeframe,
            "settings loaded"
        );
        Ok(settings)
    }

    /// Apply environment overrides: `PROCYON_PAIRS` (comma separated),
    /// `PROCYON_TIMEFRAME`, `PROCYON_CHART_ADDR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(pairs) = std::env::var("PROCYON_PAIRS") {
            let parsed: Vec<String> = pairs
                .split(',')
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.pairs = parsed;
            }
        }
        if let Ok(tf) = std::env::var("PROCYON_TIMEFRAME") {
            if !tf.trim().is_empty() {
                self.timeframe = tf.trim().to_string();
            }
        }
        if let Ok(addr) = std::env::var("PROCYON_CHART_ADDR") {
            self.chart_addr = addr;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert_eq!(s.pairs, vec!["KRW-DOGE"]);
        assert_eq!(s.timeframe, "1m");
        assert_eq!(s.quote_currency, "KRW");
        assert!((s.paper_balance - 1_000_000.0).abs() < f64::EPSILON);
        assert!(s.ws_url.starts_with("wss://"));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.pairs, vec!["KRW-DOGE"]);
        assert_eq!(s.chart_addr, "0.0.0.0:8080");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{ "pairs": ["KRW-BTC", "KRW-ETH"], "timeframe": "4h" }"#)
                .unwrap();
        assert_eq!(s.pairs, vec!["KRW-BTC", "KRW-ETH"]);
        assert_eq!(s.timeframe, "4h");
        assert_eq!(s.quote_currency, "KRW");
    }

    #[test]
    fn roundtrip_serialisation() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let s2: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s.pairs, s2.pairs);
        assert_eq!(s.timeframe, s2.timeframe);
    }
}
