//! Client for the J-Grants public subsidy listing API.
//!
//! Responses are normalized into [`Subsidy`] records at this boundary so no
//! downstream component ever touches raw JSON maps.

use crate::model::{ApiDate, ConnectionCheck, Subsidy, SubsidyStatus};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const ENDPOINT_SUBSIDIES: &str = "subsidies";
const ENDPOINT_SUBSIDY_DETAIL: &str = "subsidies/id/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("API接続エラー: {0}")]
    Connection(String),
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("JSONの解析に失敗しました: {0}")]
    Decode(String),
    #[error("無効なレスポンス形式です。{0}")]
    Schema(String),
}

/// Search filters for the listing endpoint. `keyword` is required by the
/// upstream API; everything else has the API's documented defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilters {
    pub keyword: String,
    pub sort: String,
    pub order: String,
    pub acceptance: String,
    pub use_purpose: String,
    pub industry: Vec<String>,
    pub target_employees: String,
    pub target_area: Vec<String>,
}

impl Default for SearchFilters {
    fn default() -> Self {
        SearchFilters {
            keyword: String::new(),
            sort: "created_date".to_string(),
            order: "DESC".to_string(),
            acceptance: "0".to_string(),
            use_purpose: String::new(),
            industry: Vec::new(),
            target_employees: String::new(),
            target_area: Vec::new(),
        }
    }
}

impl SearchFilters {
    pub fn for_keyword(keyword: impl Into<String>) -> Self {
        SearchFilters {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    /// Query string pairs in the order the upstream expects. Multi-value
    /// filters are joined with the API's `" / "` delimiter; empty optional
    /// filters are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("keyword", self.keyword.clone()),
            ("sort", self.sort.clone()),
            ("order", self.order.clone()),
            ("acceptance", self.acceptance.clone()),
        ];
        if !self.use_purpose.is_empty() {
            pairs.push(("use_purpose", self.use_purpose.clone()));
        }
        if !self.industry.is_empty() {
            pairs.push(("industry", self.industry.join(" / ")));
        }
        if !self.target_employees.is_empty() {
            pairs.push(("target_number_of_employees", self.target_employees.clone()));
        }
        if !self.target_area.is_empty() {
            pairs.push(("target_area_search", self.target_area.join(" / ")));
        }
        pairs
    }
}

/// A page of normalized listings plus the upstream's metadata block.
#[derive(Debug, Clone)]
pub struct ListResult {
    pub metadata: Value,
    pub subsidies: Vec<Subsidy>,
}

#[async_trait]
pub trait SubsidyService: Send + Sync {
    async fn list(&self, filters: &SearchFilters) -> Result<ListResult, ApiError>;
    async fn detail(&self, subsidy_id: &str) -> Result<Subsidy, ApiError>;
    async fn test_connection(&self) -> ConnectionCheck;
}

#[derive(Clone)]
pub struct JGrantsClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for JGrantsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JGrantsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl JGrantsClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidArgument(format!("invalid API base URL: {e}")))?;
        let http = Client::builder()
            .user_agent(concat!("jgrants-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Ok(JGrantsClient { http, base_url })
    }

    pub async fn list(&self, filters: &SearchFilters) -> Result<ListResult, ApiError> {
        if filters.keyword.chars().count() < 2 {
            return Err(ApiError::InvalidArgument(
                "キーワードは2文字以上で入力してください。".to_string(),
            ));
        }

        let mut url = self.join(ENDPOINT_SUBSIDIES)?;
        url.query_pairs_mut().extend_pairs(filters.query_pairs());
        let body = self.get(url).await?;

        let result = body
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::Schema("resultフィールドがありません。".to_string()))?;

        let now = Utc::now().naive_utc();
        let subsidies = result.iter().map(|item| normalize_subsidy(item, now)).collect();
        Ok(ListResult {
            metadata: body.get("metadata").cloned().unwrap_or(Value::Null),
            subsidies,
        })
    }

    pub async fn detail(&self, subsidy_id: &str) -> Result<Subsidy, ApiError> {
        if subsidy_id.trim().is_empty() {
            return Err(ApiError::InvalidArgument(
                "助成金IDが指定されていません。".to_string(),
            ));
        }

        let url = self.detail_url(subsidy_id)?;
        let body = self.get(url).await?;

        // The detail endpoint wraps its payload in `result`, sometimes as a
        // single-element array.
        let result = body
            .get("result")
            .ok_or_else(|| ApiError::Schema("resultフィールドがありません。".to_string()))?;
        let item = match result {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| ApiError::Schema("resultが空です。".to_string()))?,
            other => other,
        };
        Ok(normalize_subsidy(item, Utc::now().naive_utc()))
    }

    /// Probe the API with a fixed keyword and report the outcome without
    /// raising.
    pub async fn test_connection(&self) -> ConnectionCheck {
        let filters = SearchFilters {
            keyword: "テスト".to_string(),
            sort: "updated_date".to_string(),
            order: "desc".to_string(),
            acceptance: "all".to_string(),
            ..Default::default()
        };
        match self.list(&filters).await {
            Ok(result) => ConnectionCheck {
                success: true,
                message: "API接続に成功しました。".to_string(),
                data_count: Some(result.subsidies.len()),
            },
            Err(err) => ConnectionCheck {
                success: false,
                message: err.to_string(),
                data_count: None,
            },
        }
    }

    /// Detail endpoint URL with the id percent-encoded as one path segment.
    fn detail_url(&self, subsidy_id: &str) -> Result<Url, ApiError> {
        let mut url = self.join(ENDPOINT_SUBSIDY_DETAIL)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidArgument("invalid endpoint URL".to_string()))?
            .pop_if_empty()
            .push(subsidy_id);
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, ApiError> {
        // Keep any path prefix of the base URL (e.g. `/exp/v1`).
        let base = format!("{}/", self.base_url.as_str().trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|b| b.join(path))
            .map_err(|e| ApiError::InvalidArgument(format!("invalid endpoint URL: {e}")))
    }

    async fn get(&self, url: Url) -> Result<Value, ApiError> {
        debug!(url = %url, "jgrants request");
        let res = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Connection(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ApiError::Connection(e.to_string()))?;

        if status.as_u16() != 200 {
            warn!(status = status.as_u16(), "jgrants request rejected");
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: api_error_message(status.as_u16(), &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SubsidyService for JGrantsClient {
    async fn list(&self, filters: &SearchFilters) -> Result<ListResult, ApiError> {
        JGrantsClient::list(self, filters).await
    }

    async fn detail(&self, subsidy_id: &str) -> Result<Subsidy, ApiError> {
        JGrantsClient::detail(self, subsidy_id).await
    }

    async fn test_connection(&self) -> ConnectionCheck {
        JGrantsClient::test_connection(self).await
    }
}

/// Status-code-specific error message, with the provider's own error detail
/// appended when the body parses as JSON.
pub fn api_error_message(status: u16, body: &str) -> String {
    let base = match status {
        400 => "リクエストの形式が正しくありません。パラメータを確認してください。",
        401 => "認証に失敗しました。APIキーを確認してください。",
        403 => "アクセスが拒否されました。権限を確認してください。",
        404 => "リクエストしたリソースが見つかりません。",
        429 => "API使用量の制限に達しました。しばらく待ってから再試行してください。",
        500 => "サーバー内部エラーが発生しました。",
        502 => "ゲートウェイエラーが発生しました。",
        503 => "サービスが一時的に利用できません。",
        _ => "APIエラーが発生しました。",
    };

    let mut message = base.to_string();
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(detail) = parsed
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            message.push_str(&format!(" 詳細: {detail}"));
        }
    }
    message.push_str(&format!(" (ステータスコード: {status})"));
    message
}

/// Map one raw listing item into a canonical [`Subsidy`]. Missing fields
/// default to empty values; multi-value strings are split on `" / "`.
pub fn normalize_subsidy(item: &Value, now: NaiveDateTime) -> Subsidy {
    let application_start = date_field(item, "application_start_date");
    let application_end = date_field(item, "application_end_date");
    let status = determine_status(now, &application_start, &application_end);

    let (amount_min, amount_max) = clamp_amounts(
        item.get("subsidy_id").and_then(Value::as_str).unwrap_or(""),
        int_field(item, "subsidy_amount_min"),
        int_field(item, "subsidy_amount_max"),
    );

    Subsidy {
        id: str_field(item, "subsidy_id"),
        title: str_field(item, "subsidy_name"),
        organization: str_field(item, "organization_name"),
        description: str_field(item, "subsidy_outline"),
        purpose: str_field(item, "use_purpose"),
        industry: split_multi_value(&str_field(item, "industry")),
        target_area: split_multi_value(&str_field(item, "target_area")),
        target_employees: str_field(item, "target_number_of_employees"),
        amount_min,
        amount_max,
        rate: str_field(item, "subsidy_rate"),
        application_start,
        application_end,
        implementation_start: date_field(item, "implementation_start_date"),
        implementation_end: date_field(item, "implementation_end_date"),
        url: str_field(item, "subsidy_url"),
        contact: str_field(item, "contact_information"),
        updated_date: date_field(item, "updated_date"),
        status,
    }
}

/// Derive the application window status from the parsed bounds. A missing or
/// unparseable bound means the window cannot be judged.
pub fn determine_status(
    now: NaiveDateTime,
    start: &Option<ApiDate>,
    end: &Option<ApiDate>,
) -> SubsidyStatus {
    match (
        start.as_ref().and_then(ApiDate::as_naive),
        end.as_ref().and_then(ApiDate::as_naive),
    ) {
        (Some(start), Some(end)) => {
            if now < start {
                SubsidyStatus::Upcoming
            } else if now > end {
                SubsidyStatus::Closed
            } else {
                SubsidyStatus::Open
            }
        }
        _ => SubsidyStatus::Unknown,
    }
}

/// Split a `" / "`-delimited source string into trimmed parts.
pub fn split_multi_value(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(" / ").map(|s| s.trim().to_string()).collect()
}

fn str_field(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn int_field(item: &Value, key: &str) -> i64 {
    match item.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
    .max(0)
}

fn date_field(item: &Value, key: &str) -> Option<ApiDate> {
    item.get(key).and_then(Value::as_str).and_then(ApiDate::parse)
}

/// The source does not guarantee `amount_min <= amount_max`; inverted bounds
/// are swapped rather than dropped.
fn clamp_amounts(subsidy_id: &str, min: i64, max: i64) -> (i64, i64) {
    if min > 0 && max > 0 && min > max {
        warn!(subsidy_id, min, max, "inverted amount bounds; swapping");
        (max, min)
    } else {
        (min, max)
    }
}
