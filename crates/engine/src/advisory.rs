//! External advisory service
//!
//! Best-effort secondary opinion from a generative text endpoint. Every
//! failure mode (network, timeout, unparseable reply) collapses to `None`
//! so the caller emits its combined prediction unadjusted.

use std::time::Duration;

use async_trait::async_trait;
use persistence::repository::PerformanceSummary;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::features::FeatureVector;
use crate::patterns::Pattern;
use crate::types::{Candle, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Sideways,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Uptrend => "UPTREND",
            Trend::Downtrend => "DOWNTREND",
            Trend::Sideways => "SIDEWAYS",
        }
    }
}

/// Context handed to the advisory service
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest {
    pub patterns: Vec<String>,
    pub candle_summaries: Vec<String>,
    pub trend: Trend,
    pub volatility_ratio: f64,
    pub near_support: bool,
    pub near_resistance: bool,
    pub performance: Option<PerformanceSummary>,
}

/// Parsed advisory reply. `prediction` and `confidence` are mandatory;
/// everything else defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryAnalysis {
    pub prediction: Direction,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub manipulation_detected: bool,
    #[serde(default)]
    pub manipulation_reason: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

#[async_trait]
pub trait AdvisoryService: Send + Sync {
    fn is_ready(&self) -> bool;
    async fn analyze(&self, request: &AdvisoryRequest) -> Option<AdvisoryAnalysis>;
}

// ============================================================================
// Request assembly
// ============================================================================

impl AdvisoryRequest {
    pub fn build(
        features: &FeatureVector,
        patterns: &[Pattern],
        candles: &[Candle],
        performance: Option<PerformanceSummary>,
    ) -> Self {
        let tail = if candles.len() >= 5 {
            &candles[candles.len() - 5..]
        } else {
            candles
        };
        let candle_summaries = tail
            .iter()
            .map(|c| {
                let direction = if c.is_bullish() { "UP" } else { "DOWN" };
                format!("{direction} (body: {:.5})", c.body())
            })
            .collect();

        Self {
            patterns: patterns.iter().map(|p| p.as_str().to_string()).collect(),
            candle_summaries,
            trend: trend_of(features),
            volatility_ratio: features.volatility_ratio,
            near_support: features.near_support == 1.0,
            near_resistance: features.near_resistance == 1.0,
            performance,
        }
    }
}

fn trend_of(features: &FeatureVector) -> Trend {
    let avg = (features.short_term_slope + features.medium_term_slope + features.long_term_slope)
        / 3.0;
    if avg > 0.0001 {
        Trend::Uptrend
    } else if avg < -0.0001 {
        Trend::Downtrend
    } else {
        Trend::Sideways
    }
}

fn volatility_bucket(ratio: f64) -> &'static str {
    if ratio > 1.5 {
        "HIGH"
    } else if ratio > 0.8 {
        "NORMAL"
    } else {
        "LOW"
    }
}

fn build_prompt(request: &AdvisoryRequest) -> String {
    let patterns = if request.patterns.is_empty() {
        "none".to_string()
    } else {
        request.patterns.join(", ")
    };

    let mut prompt = format!(
        "You are an expert trading analyst. Analyze the following market data.\n\n\
         Market context:\n\
         - Detected patterns: {patterns}\n\
         - Recent candles: {}\n\
         - Overall trend: {}\n\
         - Volatility: {}\n\
         - Near support: {}\n\
         - Near resistance: {}\n",
        request.candle_summaries.join(" then "),
        request.trend.as_str(),
        volatility_bucket(request.volatility_ratio),
        if request.near_support { "YES" } else { "NO" },
        if request.near_resistance { "YES" } else { "NO" },
    );

    if let Some(perf) = &request.performance {
        prompt.push_str(&format!(
            "\nRecent performance:\n- Win rate: {:.1}%\n- Last 10 trades: {}\n",
            perf.win_rate * 100.0,
            if perf.last_10.is_empty() { "N/A" } else { &perf.last_10 },
        ));
    }

    prompt.push_str(
        "\nTask:\n\
         1. Check whether this looks like price manipulation (sudden reversals, suspicious patterns)\n\
         2. Predict the next likely move (UP or DOWN)\n\
         3. Give a confidence level between 0.0 and 1.0\n\
         4. Give brief reasoning\n\n\
         Respond in JSON:\n\
         {\n\
             \"prediction\": \"UP\" or \"DOWN\",\n\
             \"confidence\": 0.0-1.0,\n\
             \"reasoning\": \"brief explanation\",\n\
             \"manipulation_detected\": true/false,\n\
             \"manipulation_reason\": \"explanation if detected\",\n\
             \"risk_level\": \"LOW\", \"MEDIUM\" or \"HIGH\"\n\
         }\n\n\
         Be concise and data-driven.",
    );

    prompt
}

/// Extract the first JSON object from a free-text reply. Anything that does
/// not carry the mandatory fields yields `None`.
fn parse_analysis(text: &str) -> Option<AdvisoryAnalysis> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<AdvisoryAnalysis>(&text[start..=end]) {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            warn!(error = %e, "advisory reply not parseable as analysis JSON");
            None
        }
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Client for a Gemini-style generate endpoint. Not ready without an API
/// key; every call is bounded by the configured timeout.
pub struct HttpAdvisoryClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpAdvisoryClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    fn extract_text(body: &serde_json::Value) -> Option<&str> {
        body.get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
    }
}

#[async_trait]
impl AdvisoryService for HttpAdvisoryClient {
    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn analyze(&self, request: &AdvisoryRequest) -> Option<AdvisoryAnalysis> {
        if !self.is_ready() {
            return None;
        }

        let prompt = build_prompt(request);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = match self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "advisory request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "advisory returned error status");
            return None;
        }

        let json: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "advisory response body unreadable");
                return None;
            }
        };

        let text = Self::extract_text(&json)?;
        debug!(chars = text.len(), "advisory reply received");
        parse_analysis(text)
    }
}
