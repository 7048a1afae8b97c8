//! Tushare Pro HTTP client.
//!
//! Every endpoint is a JSON POST of `{api_name, token, params, fields}` that
//! answers `{code, msg, data: {fields, items}}`. Rows come back as positional
//! arrays, newest trading date first. Transient failures are retried with
//! exponential backoff behind a shared circuit breaker; a rejected token trips
//! the breaker immediately.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{
    parse_wire_date, DataError, DateRange, IndexWeight, LongTable, MarketDataClient,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Public Tushare Pro endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://api.tushare.pro";

/// Provider code for an invalid or expired token.
const CODE_TOKEN_INVALID: i64 = 40101;
/// Provider code for an exhausted per-minute quota.
const CODE_RATE_LIMITED: i64 = 40203;

/// Upper bound on a single retry sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const SYMBOL_COLUMN: &str = "ts_code";
const DATE_COLUMN: &str = "trade_date";

/// Connection settings for [`TushareClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: BTreeMap<&'a str, String>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ApiFrame>,
}

/// Positional result frame: `items[i][j]` is the value of `fields[j]`.
#[derive(Debug, Deserialize)]
struct ApiFrame {
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

/// Tushare Pro client.
pub struct TushareClient {
    client: reqwest::blocking::Client,
    token: String,
    settings: ClientSettings,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl TushareClient {
    pub fn new(token: impl Into<String>, settings: ClientSettings) -> Result<Self, DataError> {
        Self::with_circuit_breaker(
            token,
            settings,
            Arc::new(CircuitBreaker::default_provider()),
        )
    }

    /// Build a client that shares `circuit_breaker` with other clients.
    pub fn with_circuit_breaker(
        token: impl Into<String>,
        settings: ClientSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DataError::MissingToken);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            settings,
            circuit_breaker,
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Run one API call with retry and circuit breaker logic.
    fn query(
        &self,
        api_name: &str,
        params: BTreeMap<&str, String>,
        fields: &[&str],
    ) -> Result<ApiFrame, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let request = ApiRequest {
            api_name,
            token: &self.token,
            params,
            fields: fields.join(","),
        };
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.settings.retry_base_delay, attempt);
                debug!(api_name, attempt, ?delay, "retrying");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.send_once(&request) {
                Ok(frame) => {
                    self.circuit_breaker.record_success();
                    return Ok(frame);
                }
                Err(DataError::AuthenticationRequired(msg)) => {
                    self.circuit_breaker.trip();
                    return Err(DataError::AuthenticationRequired(msg));
                }
                Err(e) if e.is_transient() => {
                    warn!(api_name, attempt, error = %e, "transient provider failure");
                    self.circuit_breaker.record_failure();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn send_once(&self, request: &ApiRequest<'_>) -> Result<ApiFrame, DataError> {
        let resp = self
            .client
            .post(&self.settings.endpoint)
            .json(request)
            .send()
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DataError::RateLimited(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(DataError::NetworkUnreachable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(DataError::Other(format!(
                "HTTP {status} for {}",
                request.api_name
            )));
        }

        let body: ApiResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "failed to parse {} response: {e}",
                request.api_name
            ))
        })?;
        interpret(body)
    }
}

/// Sleep before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn classify_transport_error(e: reqwest::Error) -> DataError {
    if e.is_timeout() {
        DataError::Timeout(e.to_string())
    } else {
        DataError::NetworkUnreachable(e.to_string())
    }
}

/// Map the provider envelope to a frame or a typed error.
fn interpret(body: ApiResponse) -> Result<ApiFrame, DataError> {
    let message = body.msg.unwrap_or_default();
    match body.code {
        0 => body
            .data
            .ok_or_else(|| DataError::ResponseFormatChanged("success without data".into())),
        CODE_TOKEN_INVALID => Err(DataError::AuthenticationRequired(message)),
        CODE_RATE_LIMITED => Err(DataError::RateLimited(message)),
        // Quota messages sometimes arrive under a generic code.
        _ if message.contains("每分钟") => Err(DataError::RateLimited(message)),
        code => Err(DataError::Provider { code, message }),
    }
}

fn cell_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn required_column(frame: &ApiFrame, name: &str) -> Result<usize, DataError> {
    frame
        .fields
        .iter()
        .position(|f| f == name)
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("response lacks '{name}'")))
}

fn row_date(row: &[Value], idx: usize) -> Result<chrono::NaiveDate, DataError> {
    let raw = row
        .get(idx)
        .and_then(cell_str)
        .ok_or_else(|| DataError::ResponseFormatChanged("row without trade_date".into()))?;
    parse_wire_date(raw).map_err(|_| DataError::ResponseFormatChanged(format!("bad trade_date '{raw}'")))
}

/// Convert a per-symbol frame into a long table.
///
/// Value columns keep the provider's names even when `items` is empty.
fn frame_to_long(frame: &ApiFrame) -> Result<LongTable, DataError> {
    let code_idx = required_column(frame, SYMBOL_COLUMN)?;
    let date_idx = required_column(frame, DATE_COLUMN)?;
    let value_idx: Vec<usize> = (0..frame.fields.len())
        .filter(|&i| i != code_idx && i != date_idx)
        .collect();

    let mut table = LongTable::new(value_idx.iter().map(|&i| frame.fields[i].clone()).collect());
    for row in &frame.items {
        let symbol = row
            .get(code_idx)
            .and_then(cell_str)
            .ok_or_else(|| DataError::ResponseFormatChanged("row without ts_code".into()))?;
        let date = row_date(row, date_idx)?;
        let values = value_idx
            .iter()
            .map(|&i| row.get(i).and_then(cell_f64))
            .collect();
        table.push(date, symbol, values)?;
    }
    Ok(table)
}

fn frame_to_weights(frame: &ApiFrame) -> Result<Vec<IndexWeight>, DataError> {
    let index_idx = required_column(frame, "index_code")?;
    let con_idx = required_column(frame, "con_code")?;
    let date_idx = required_column(frame, DATE_COLUMN)?;
    let weight_idx = frame.fields.iter().position(|f| f == "weight");

    frame
        .items
        .iter()
        .map(|row| -> Result<IndexWeight, DataError> {
            let text = |idx: usize, what: &str| {
                row.get(idx)
                    .and_then(cell_str)
                    .map(str::to_string)
                    .ok_or_else(|| DataError::ResponseFormatChanged(format!("row without {what}")))
            };
            Ok(IndexWeight {
                index_code: text(index_idx, "index_code")?,
                con_code: text(con_idx, "con_code")?,
                trade_date: row_date(row, date_idx)?,
                weight: weight_idx.and_then(|i| row.get(i)).and_then(cell_f64),
            })
        })
        .collect()
}

fn range_params<'a>(key: &'a str, code: &str, range: &DateRange) -> BTreeMap<&'a str, String> {
    let mut params = BTreeMap::new();
    params.insert(key, code.to_string());
    params.insert("start_date", range.start_wire());
    params.insert("end_date", range.end_wire());
    params
}

impl MarketDataClient for TushareClient {
    fn name(&self) -> &str {
        "tushare"
    }

    fn daily(&self, codes: &str, range: &DateRange) -> Result<LongTable, DataError> {
        let frame = self.query("daily", range_params(SYMBOL_COLUMN, codes, range), &[])?;
        frame_to_long(&frame)
    }

    fn daily_basic(
        &self,
        codes: &str,
        range: &DateRange,
        fields: &[&str],
    ) -> Result<LongTable, DataError> {
        let frame = self.query(
            "daily_basic",
            range_params(SYMBOL_COLUMN, codes, range),
            fields,
        )?;
        frame_to_long(&frame)
    }

    fn index_daily(&self, index_code: &str, range: &DateRange) -> Result<LongTable, DataError> {
        let frame = self.query(
            "index_daily",
            range_params(SYMBOL_COLUMN, index_code, range),
            &[],
        )?;
        frame_to_long(&frame)
    }

    fn index_weight(
        &self,
        index_code: &str,
        range: &DateRange,
    ) -> Result<Vec<IndexWeight>, DataError> {
        let frame = self.query(
            "index_weight",
            range_params("index_code", index_code, range),
            &["index_code", "con_code", "trade_date", "weight"],
        )?;
        frame_to_weights(&frame)
    }
}
