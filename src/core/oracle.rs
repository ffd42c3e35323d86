//! Forecast oracle adapter
//!
//! [`ForecastAdvisor::explain`] turns an account and its history into a [`ForecastResult`].
//! The oracle (a local Ollama model by default) is asked first; any failure falls back to the
//! CAGR baseline, so the advisor never fails.

use super::baseline::{baseline_reason, baseline_result};
use crate::config::OracleConfig;
use crate::error::{OutlookError, OutlookResult};
use crate::types::{round2, ForecastOrigin, ForecastResult, HistoricalTriple};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

//==============================================================================
// Errors
//==============================================================================

/// Oracle invocation failures. They never leave the adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle returned an empty response")]
    EmptyResponse,
}

impl OracleError {
    /// Worth another attempt?
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Unavailable(_))
    }
}

/// Why a raw oracle response could not be read as a forecast
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("JSON object is not closed")]
    Unbalanced,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("response is JSON but not an object")]
    NotAnObject,
}

//==============================================================================
// Oracle
//==============================================================================

/// A text-generation service answering a prompt synchronously
pub trait ForecastOracle {
    /// Short name for logs
    fn name(&self) -> &str;

    fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama `/api/generate` client (non-streaming)
pub struct OllamaOracle {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    temperature: f64,
}

impl OllamaOracle {
    pub fn new(config: &OracleConfig) -> OutlookResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OutlookError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

impl ForecastOracle for OllamaOracle {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(OracleError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Oracle that is never reachable; every forecast takes the baseline path
pub struct UnavailableOracle;

impl ForecastOracle for UnavailableOracle {
    fn name(&self) -> &str {
        "offline"
    }

    fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::Unavailable("offline mode".to_string()))
    }
}

//==============================================================================
// Prompt & Response
//==============================================================================

/// External context snippets from the `description` column of a CSV file.
///
/// A missing file or column yields no snippets (with a warning): the oracle can still forecast
/// from history alone.
pub fn load_contexts(path: &Path) -> OutlookResult<Vec<String>> {
    if !path.exists() {
        warn!(path = %path.display(), "context file not found, prompting without context");
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let Some(idx) = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "description")
    else {
        warn!(path = %path.display(), "context file has no 'description' column");
        return Ok(Vec::new());
    };

    let mut contexts = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(text) = record.get(idx).map(str::trim).filter(|t| !t.is_empty()) {
            contexts.push(text.to_string());
        }
    }
    Ok(contexts)
}

/// Prompt for one account: controller persona, context bullets, history and the JSON contract
pub fn build_prompt(contexts: &[String], account: &str, history: &HistoricalTriple) -> String {
    let [t_minus_2, t_minus_1, t_zero] = history.with_defaults();
    let context_lines = if contexts.is_empty() {
        "- (none)".to_string()
    } else {
        contexts
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a financial controller. You receive the historical values of a **single** \
line item and general external circumstances. Produce a forecast for t1 to t3 and explain \
**specifically** why these circumstances affect **this** line item. \
Answer only in JSON with the keys `t1`, `t2`, `t3`, `reason`.

External circumstances:
{context_lines}

Line item: **{account}**
Historical values:
- t-2: {t_minus_2:.2}
- t-1: {t_minus_1:.2}
- t0 : {t_zero:.2}

Provide:
1) Forecast values for t1, t2, t3 (numbers only)
2) A short reason specific to {account} (`reason`, at most 20 words) explaining why these \
circumstances influence it.

Answer in this JSON format:
{{\"t1\": <number>, \"t2\": <number>, \"t3\": <number>, \"reason\": \"<short text>\"}}
"
    )
}

/// First balanced `{…}` in `text`, skipping braces inside JSON strings
pub fn extract_json_object(text: &str) -> Result<&str, ForecastParseError> {
    let Some(start) = text.find('{') else {
        return match serde_json::from_str::<Value>(text.trim()) {
            Ok(_) => Err(ForecastParseError::NotAnObject),
            Err(_) => Err(ForecastParseError::NoJsonObject),
        };
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Err(ForecastParseError::Unbalanced)
}

/// Forecast fields read from a response; absent or non-numeric keys stay `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastDraft {
    pub t1: Option<f64>,
    pub t2: Option<f64>,
    pub t3: Option<f64>,
    pub reason: Option<String>,
}

impl ForecastDraft {
    fn provided(&self) -> usize {
        [self.t1, self.t2, self.t3].iter().filter(|v| v.is_some()).count()
            + usize::from(self.reason.is_some())
    }
}

/// Read the forecast out of free-text oracle output
pub fn parse_forecast_response(text: &str) -> Result<ForecastDraft, ForecastParseError> {
    let json_text = extract_json_object(text)?;
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| ForecastParseError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(ForecastParseError::NotAnObject)?;

    let number = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    };
    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ForecastDraft {
        t1: number("t1"),
        t2: number("t2"),
        t3: number("t3"),
        reason,
    })
}

//==============================================================================
// Run Log
//==============================================================================

const BLOCK_RULE: &str = "============================================================";

/// Append-only diagnostic log of prompts, raw responses and errors
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Open (or create) the log and start a new run block
    pub fn start(path: &Path, oracle: &str) -> OutlookResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = Self {
            path: path.to_path_buf(),
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        log.append(&format!("\n##### RUN {} (oracle: {}) #####\n", stamp, oracle));
        Ok(log)
    }

    /// Write failures are reported but never interrupt forecasting
    fn append(&self, text: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(text.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "cannot write oracle run log");
        }
    }
}

//==============================================================================
// Advisor
//==============================================================================

/// The oracle adapter: built once per run and shared by all sheet writers
pub struct ForecastAdvisor {
    oracle: Box<dyn ForecastOracle>,
    contexts: Vec<String>,
    max_attempts: u32,
    log: Option<RunLog>,
}

impl ForecastAdvisor {
    pub fn new(oracle: Box<dyn ForecastOracle>, contexts: Vec<String>, max_attempts: u32) -> Self {
        Self {
            oracle,
            contexts,
            max_attempts: max_attempts.max(1),
            log: None,
        }
    }

    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    fn log(&self, text: &str) {
        if let Some(log) = &self.log {
            log.append(text);
        }
    }

    /// Forecast for one account. Always returns all four fields.
    ///
    /// `baseline` is a precomputed projection used for the fallback when it has three entries.
    pub fn explain(
        &self,
        account: &str,
        history: &HistoricalTriple,
        baseline: Option<&[f64]>,
    ) -> ForecastResult {
        let prompt = build_prompt(&self.contexts, account, history);
        self.log(&format!(
            "\n{}\nACCOUNT: {}\nPROMPT:\n{}\n",
            BLOCK_RULE, account, prompt
        ));

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.oracle.complete(&prompt) {
                Ok(raw) => {
                    self.log(&format!("\nRAW_RESPONSE (attempt {}):\n{}\n", attempt, raw));
                    match parse_forecast_response(&raw) {
                        Ok(draft) => {
                            debug!(account, attempt, "oracle forecast parsed");
                            return merge_with_baseline(account, history, baseline, draft);
                        }
                        Err(e) => {
                            self.log(&format!("\nERROR (attempt {}): {}\n", attempt, e));
                            last_error = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    self.log(&format!("\nERROR (attempt {}): {}\n", attempt, e));
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        break;
                    }
                }
            }
        }

        warn!(account, error = %last_error, "oracle failed, using CAGR baseline");
        self.log(&format!("\nFALLBACK: {}\n", baseline_reason(account)));
        baseline_result(account, history, baseline)
    }
}

/// Oracle values where present, baseline values for the gaps
fn merge_with_baseline(
    account: &str,
    history: &HistoricalTriple,
    baseline: Option<&[f64]>,
    draft: ForecastDraft,
) -> ForecastResult {
    let fallback = baseline_result(account, history, baseline);
    let origin = match draft.provided() {
        4 => ForecastOrigin::Oracle,
        0 => ForecastOrigin::Baseline,
        _ => ForecastOrigin::Mixed,
    };
    ForecastResult {
        t1: draft.t1.map(round2).unwrap_or(fallback.t1),
        t2: draft.t2.map(round2).unwrap_or(fallback.t2),
        t3: draft.t3.map(round2).unwrap_or(fallback.t3),
        reason: draft.reason.unwrap_or(fallback.reason),
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned answers, then reports itself unavailable
    struct ScriptedOracle {
        answers: RefCell<Vec<Result<String, OracleError>>>,
        calls: RefCell<usize>,
    }

    impl ScriptedOracle {
        fn new(answers: Vec<Result<String, OracleError>>) -> Self {
            Self {
                answers: RefCell::new(answers.into_iter().rev().collect()),
                calls: RefCell::new(0),
            }
        }
    }

    impl ForecastOracle for ScriptedOracle {
        fn name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            *self.calls.borrow_mut() += 1;
            self.answers
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Err(OracleError::Unavailable("script exhausted".into())))
        }
    }

    fn history() -> HistoricalTriple {
        HistoricalTriple::new(Some(100.0), Some(110.0), 121.0)
    }

    #[test]
    fn test_extract_json_with_leading_prose() {
        let raw = "Sure! Here is the forecast:\n{\"t1\": 1, \"reason\": \"a {b} c\"} trailing {x}";
        assert_eq!(
            extract_json_object(raw).unwrap(),
            "{\"t1\": 1, \"reason\": \"a {b} c\"}"
        );
    }

    #[test]
    fn test_extract_json_escaped_quote() {
        let raw = r#"{"reason": "he said \"}\" twice"} rest"#;
        assert_eq!(
            extract_json_object(raw).unwrap(),
            r#"{"reason": "he said \"}\" twice"}"#
        );
    }

    #[test]
    fn test_parse_error_taxonomy() {
        assert_eq!(
            parse_forecast_response("no forecast today"),
            Err(ForecastParseError::NoJsonObject)
        );
        assert_eq!(
            parse_forecast_response("{\"t1\": 5, \"t2\": "),
            Err(ForecastParseError::Unbalanced)
        );
        assert!(matches!(
            parse_forecast_response("{t1: 5}"),
            Err(ForecastParseError::InvalidJson(_))
        ));
        assert_eq!(
            parse_forecast_response("[1, 2, 3]"),
            Err(ForecastParseError::NotAnObject)
        );
    }

    #[test]
    fn test_parse_wrong_key_types_are_absent() {
        let draft =
            parse_forecast_response(r#"{"t1": "140", "t2": 150.5, "t3": null, "reason": 7}"#)
                .unwrap();
        assert_eq!(
            draft,
            ForecastDraft {
                t1: None,
                t2: Some(150.5),
                t3: None,
                reason: None,
            }
        );
    }

    #[test]
    fn test_non_json_answer_falls_back_to_baseline() {
        let oracle = ScriptedOracle::new(vec![
            Ok("I cannot forecast this.".to_string()),
            Ok("Still no JSON.".to_string()),
        ]);
        let advisor = ForecastAdvisor::new(Box::new(oracle), vec![], 2);
        let result = advisor.explain("Umsatzerlöse", &history(), None);
        assert_eq!(result.values(), [133.1, 146.41, 161.05]);
        assert!(result.reason.contains("Umsatzerlöse"));
        assert_eq!(result.origin, ForecastOrigin::Baseline);
    }

    #[test]
    fn test_retry_after_transport_error() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transport("connection reset".into())),
            Ok(r#"Forecast: {"t1": 130, "t2": 140.456, "t3": 150, "reason": "Price increases"}"#
                .to_string()),
        ]);
        let advisor = ForecastAdvisor::new(Box::new(oracle), vec![], 2);
        let result = advisor.explain("Umsatzerlöse", &history(), None);
        assert_eq!(result.values(), [130.0, 140.46, 150.0]);
        assert_eq!(result.reason, "Price increases");
        assert_eq!(result.origin, ForecastOrigin::Oracle);
    }

    #[test]
    fn test_unavailable_oracle_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![]);
        let advisor = ForecastAdvisor::new(Box::new(oracle), vec![], 5);
        let result = advisor.explain("Vorräte", &history(), Some(&[1.0, 2.0, 3.0]));
        assert_eq!(result.values(), [1.0, 2.0, 3.0]);
        assert_eq!(result.origin, ForecastOrigin::Baseline);
    }

    #[test]
    fn test_partial_answer_is_mixed() {
        let oracle = ScriptedOracle::new(vec![Ok(r#"{"t1": 125, "reason": "Stable"}"#.into())]);
        let advisor = ForecastAdvisor::new(Box::new(oracle), vec![], 1);
        let result = advisor.explain("Vorräte", &history(), None);
        assert_eq!(result.values(), [125.0, 146.41, 161.05]);
        assert_eq!(result.reason, "Stable");
        assert_eq!(result.origin, ForecastOrigin::Mixed);
    }

    #[test]
    fn test_prompt_contains_history_and_contexts() {
        let history = HistoricalTriple::new(None, Some(1234.5), 99.0);
        let prompt = build_prompt(&["Energy prices rise".to_string()], "Materialaufwand", &history);
        assert!(prompt.contains("- Energy prices rise"));
        assert!(prompt.contains("Line item: **Materialaufwand**"));
        assert!(prompt.contains("- t-2: 0.00"));
        assert!(prompt.contains("- t-1: 1234.50"));
        assert!(prompt.contains("- t0 : 99.00"));
        assert!(prompt.contains(r#"{"t1": <number>"#));
    }

    #[test]
    fn test_run_log_records_prompt_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::start(&dir.path().join("out").join("llm_debug.txt"), "offline").unwrap();
        let advisor = ForecastAdvisor::new(Box::new(UnavailableOracle), vec![], 2).with_run_log(log);
        advisor.explain("Vorräte", &history(), None);

        let content = fs::read_to_string(dir.path().join("out/llm_debug.txt")).unwrap();
        assert!(content.contains("##### RUN"));
        assert!(content.contains("ACCOUNT: Vorräte"));
        assert!(content.contains("ERROR (attempt 1): oracle unavailable: offline mode"));
        assert!(!content.contains("attempt 2"));
        assert!(content.contains("FALLBACK: CAGR baseline for Vorräte"));
    }

    #[test]
    fn test_load_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        fs::write(&path, "id,description\n1,Energy prices rise\n2,  \n3,\"Wages, +4%\"\n").unwrap();
        assert_eq!(
            load_contexts(&path).unwrap(),
            vec!["Energy prices rise".to_string(), "Wages, +4%".to_string()]
        );
        assert!(load_contexts(&dir.path().join("missing.csv")).unwrap().is_empty());
    }
}
