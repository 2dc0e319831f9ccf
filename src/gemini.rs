//! Gemini-backed content generation: summary, long-form description, and
//! tags for a normalized subsidy.

use crate::config::AiSettings;
use crate::model::{format_date, BatchContentResult, ConnectionCheck, GeneratedContent, Subsidy};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed pause between items in a batch run, a cooperative self-throttle for
/// the upstream rate limit.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Gemini APIキーが設定されていません。")]
    NotConfigured,
    #[error("Gemini API接続エラー: {0}")]
    Connection(String),
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("JSONの解析に失敗しました: {0}")]
    Decode(String),
    #[error("{0}")]
    Schema(String),
}

#[async_trait]
pub trait ContentService: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn summary(&self, subsidy: &Subsidy) -> Result<String, AiError>;
    async fn detailed_description(&self, subsidy: &Subsidy) -> Result<String, AiError>;
    async fn tags(&self, subsidy: &Subsidy) -> Result<Vec<String>, AiError>;
    async fn test_connection(&self) -> ConnectionCheck;

    /// Generate all three fields for each subsidy. A failure in one field
    /// never blocks the others; each result carries its own error list.
    async fn generate_batch(&self, subsidies: &[Subsidy]) -> Vec<BatchContentResult> {
        let mut results = Vec::with_capacity(subsidies.len());
        for subsidy in subsidies {
            let mut content = GeneratedContent::default();
            let mut errors = Vec::new();

            match self.summary(subsidy).await {
                Ok(text) => content.summary = text,
                Err(err) => errors.push(format!("summary: {err}")),
            }
            match self.detailed_description(subsidy).await {
                Ok(text) => content.detailed_description = text,
                Err(err) => errors.push(format!("description: {err}")),
            }
            match self.tags(subsidy).await {
                Ok(tags) => content.tags = tags,
                Err(err) => errors.push(format!("tags: {err}")),
            }

            results.push(BatchContentResult {
                subsidy_id: subsidy.id.clone(),
                content,
                errors,
            });

            tokio::time::sleep(BATCH_PAUSE).await;
        }
        results
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    settings: AiSettings,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.settings.model)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(settings: AiSettings) -> Self {
        let base_url = Url::parse(GEMINI_API_BASE).expect("valid default Gemini URL");
        Self::with_base_url(settings, base_url)
    }

    pub fn with_base_url(settings: AiSettings, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent(concat!("jgrants-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        GeminiClient {
            http,
            base_url,
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.api_key.trim().is_empty()
    }

    pub async fn summary(&self, subsidy: &Subsidy) -> Result<String, AiError> {
        if !self.is_configured() {
            return Err(AiError::NotConfigured);
        }
        self.generate(&build_summary_prompt(subsidy)).await
    }

    pub async fn detailed_description(&self, subsidy: &Subsidy) -> Result<String, AiError> {
        if !self.is_configured() {
            return Err(AiError::NotConfigured);
        }
        self.generate(&build_detailed_description_prompt(subsidy)).await
    }

    /// Generate tags for a subsidy. Returns an empty list (not an error) when
    /// tag generation is administratively disabled.
    pub async fn tags(&self, subsidy: &Subsidy) -> Result<Vec<String>, AiError> {
        if !self.is_configured() {
            return Err(AiError::NotConfigured);
        }
        if !self.settings.enable_ai_tags {
            return Ok(Vec::new());
        }
        let response = self.generate(&build_tags_prompt(subsidy)).await?;
        Ok(parse_tags_response(&response))
    }

    /// Probe the API with a canned prompt and report the outcome without
    /// raising.
    pub async fn test_connection(&self) -> ConnectionCheck {
        if !self.is_configured() {
            return ConnectionCheck {
                success: false,
                message: "Gemini APIキーが設定されていません。".to_string(),
                data_count: None,
            };
        }
        let probe = "こんにちは。APIの接続テストです。「接続成功」と返答してください。";
        match self.generate(probe).await {
            Ok(_) => ConnectionCheck {
                success: true,
                message: "Gemini API接続に成功しました。".to_string(),
                data_count: None,
            },
            Err(err) => ConnectionCheck {
                success: false,
                message: err.to_string(),
                data_count: None,
            },
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let mut url = self
            .base_url
            .join(&format!("models/{}:generateContent", self.settings.model))
            .map_err(|e| AiError::Connection(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.settings.api_key);

        let body = build_generate_request(prompt, &self.settings);
        debug!(model = %self.settings.model, "gemini request");

        let res = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Connection(e.to_string()))?;

        let status = res.status();
        let response_body = res
            .text()
            .await
            .map_err(|e| AiError::Connection(e.to_string()))?;

        if status.as_u16() != 200 {
            warn!(status = status.as_u16(), "gemini request rejected");
            return Err(AiError::Http {
                status: status.as_u16(),
                message: gemini_error_message(status.as_u16(), &response_body),
            });
        }

        let data: Value =
            serde_json::from_str(&response_body).map_err(|e| AiError::Decode(e.to_string()))?;

        match data
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
        {
            Some(text) => Ok(text.to_string()),
            None => {
                if let Some(message) = data
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                {
                    return Err(AiError::Schema(format!("Gemini APIエラー: {message}")));
                }
                let snippet: String = response_body.chars().take(200).collect();
                Err(AiError::Schema(format!(
                    "無効なレスポンス形式です。レスポンス: {snippet}"
                )))
            }
        }
    }
}

#[async_trait]
impl ContentService for GeminiClient {
    fn is_configured(&self) -> bool {
        GeminiClient::is_configured(self)
    }

    async fn summary(&self, subsidy: &Subsidy) -> Result<String, AiError> {
        GeminiClient::summary(self, subsidy).await
    }

    async fn detailed_description(&self, subsidy: &Subsidy) -> Result<String, AiError> {
        GeminiClient::detailed_description(self, subsidy).await
    }

    async fn tags(&self, subsidy: &Subsidy) -> Result<Vec<String>, AiError> {
        GeminiClient::tags(self, subsidy).await
    }

    async fn test_connection(&self) -> ConnectionCheck {
        GeminiClient::test_connection(self).await
    }
}

pub fn build_generate_request(prompt: &str, settings: &AiSettings) -> Value {
    json!({
        "contents": [
            { "parts": [ { "text": prompt } ] }
        ],
        "generationConfig": {
            "temperature": settings.temperature,
            "topK": 40,
            "topP": 0.95,
            "maxOutputTokens": settings.max_tokens,
        }
    })
}

pub fn build_summary_prompt(data: &Subsidy) -> String {
    let mut prompt = String::from(
        "以下の助成金情報を基に、わかりやすく簡潔な要約を200文字以内で作成してください。\n\n",
    );
    prompt.push_str(&format!("助成金名: {}\n", data.title));
    prompt.push_str(&format!("実施機関: {}\n", data.organization));
    prompt.push_str(&format!("概要: {}\n", data.description));
    prompt.push_str(&format!("対象業種: {}\n", data.industry.join(", ")));
    prompt.push_str(&format!("対象地域: {}\n", data.target_area.join(", ")));
    prompt.push_str(&format!(
        "補助金額: {}円 〜 {}円\n",
        format_yen(data.amount_min),
        format_yen(data.amount_max)
    ));
    prompt.push_str(&format!("補助率: {}\n", data.rate));
    prompt.push_str(&format!(
        "申請期間: {} 〜 {}\n\n",
        format_date(&data.application_start),
        format_date(&data.application_end)
    ));
    prompt.push_str("要約は以下の点を含めてください：\n");
    prompt.push_str("- 助成金の目的と対象\n");
    prompt.push_str("- 主な支援内容\n");
    prompt.push_str("- 申請のポイント\n\n");
    prompt.push_str("読みやすく、事業者にとって有益な情報として整理してください。");
    prompt
}

pub fn build_detailed_description_prompt(data: &Subsidy) -> String {
    let mut prompt = String::from(
        "以下の助成金情報を基に、事業者向けの詳細な説明記事を800文字程度で作成してください。\n\n",
    );
    prompt.push_str(&format!("助成金名: {}\n", data.title));
    prompt.push_str(&format!("実施機関: {}\n", data.organization));
    prompt.push_str(&format!("概要: {}\n", data.description));
    prompt.push_str(&format!("利用目的: {}\n", data.purpose));
    prompt.push_str(&format!("対象業種: {}\n", data.industry.join(", ")));
    prompt.push_str(&format!("対象地域: {}\n", data.target_area.join(", ")));
    prompt.push_str(&format!("対象従業員数: {}\n", data.target_employees));
    prompt.push_str(&format!(
        "補助金額: {}円 〜 {}円\n",
        format_yen(data.amount_min),
        format_yen(data.amount_max)
    ));
    prompt.push_str(&format!("補助率: {}\n", data.rate));
    prompt.push_str(&format!(
        "申請期間: {} 〜 {}\n",
        format_date(&data.application_start),
        format_date(&data.application_end)
    ));
    prompt.push_str(&format!(
        "実施期間: {} 〜 {}\n\n",
        format_date(&data.implementation_start),
        format_date(&data.implementation_end)
    ));
    prompt.push_str("記事は以下の構成で作成してください：\n");
    prompt.push_str("1. 助成金の概要と目的\n");
    prompt.push_str("2. 対象となる事業者・条件\n");
    prompt.push_str("3. 支援内容と補助金額\n");
    prompt.push_str("4. 申請時の注意点\n");
    prompt.push_str("5. 活用のメリット\n\n");
    prompt.push_str("事業者が理解しやすく、実用的な内容として整理してください。");
    prompt
}

pub fn build_tags_prompt(data: &Subsidy) -> String {
    let mut prompt = String::from(
        "以下の助成金情報から、検索やカテゴリ分類に適したタグを5〜10個抽出してください。\n\n",
    );
    prompt.push_str(&format!("助成金名: {}\n", data.title));
    prompt.push_str(&format!("概要: {}\n", data.description));
    prompt.push_str(&format!("利用目的: {}\n", data.purpose));
    prompt.push_str(&format!("対象業種: {}\n\n", data.industry.join(", ")));
    prompt.push_str("タグの条件：\n");
    prompt.push_str("- 2〜4文字程度の短いキーワード\n");
    prompt.push_str("- 業種、技術分野、支援内容を表すもの\n");
    prompt.push_str("- 検索されやすい一般的な用語\n");
    prompt.push_str("- カンマ区切りで出力\n\n");
    prompt.push_str("例: IT, デジタル化, 製造業, 研究開発, スタートアップ\n\n");
    prompt.push_str("タグのみを出力してください（説明文は不要）。");
    prompt
}

/// Split a comma-separated tag response, dropping empty tokens and
/// duplicates while preserving first-seen order.
pub fn parse_tags_response(response: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for token in response.split(',') {
        let tag = token.trim();
        if tag.is_empty() {
            continue;
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Status-code-specific error message, with the provider's own error detail
/// appended when the body parses as JSON.
pub fn gemini_error_message(status: u16, body: &str) -> String {
    let base = match status {
        400 => "リクエストの形式が正しくありません。プロンプトやパラメータを確認してください。",
        401 => "APIキーが無効です。Google AI Studioで正しいAPIキーを取得してください。",
        403 => "APIキーの権限が不足しています。Google AI Studioで設定を確認してください。",
        404 => "リクエストしたモデルまたはエンドポイントが見つかりません。",
        429 => "API使用量の制限に達しました。無料プランの場合は制限があります。しばらく待ってから再試行してください。",
        500 => "Gemini APIサーバー内部エラーが発生しました。",
        503 => "Gemini APIサービスが一時的に利用できません。",
        _ => "Gemini APIエラーが発生しました。",
    };

    let mut message = base.to_string();
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(detail) = parsed
            .pointer("/error/message")
            .and_then(Value::as_str)
        {
            message.push_str(&format!(" 詳細: {detail}"));
        }
    }
    message.push_str(&format!(" (ステータスコード: {status})"));
    message
}

/// Thousands-separated yen amount for prompt text.
fn format_yen(amount: i64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiDate, SubsidyStatus};

    fn sample_subsidy() -> Subsidy {
        Subsidy {
            id: "a0W5h000000XXXXEAA".into(),
            title: "ものづくり補助金".into(),
            organization: "中小企業庁".into(),
            description: "設備投資を支援します。".into(),
            purpose: "生産性向上".into(),
            industry: vec!["製造業".into(), "情報通信業".into()],
            target_area: vec!["東京都".into()],
            target_employees: "20名以下".into(),
            amount_min: 1_000_000,
            amount_max: 12_500_000,
            rate: "1/2以内".into(),
            application_start: ApiDate::parse("2024-04-01T00:00:00Z"),
            application_end: ApiDate::parse("2024-06-30T00:00:00Z"),
            implementation_start: None,
            implementation_end: None,
            url: "https://example.jp/grant".into(),
            contact: "03-0000-0000".into(),
            updated_date: None,
            status: SubsidyStatus::Open,
        }
    }

    #[test]
    fn summary_prompt_embeds_fields() {
        let prompt = build_summary_prompt(&sample_subsidy());
        assert!(prompt.contains("200文字以内"));
        assert!(prompt.contains("助成金名: ものづくり補助金"));
        assert!(prompt.contains("対象業種: 製造業, 情報通信業"));
        assert!(prompt.contains("補助金額: 1,000,000円 〜 12,500,000円"));
        assert!(prompt.contains("申請期間: 2024-04-01 00:00:00 〜 2024-06-30 00:00:00"));
        assert!(prompt.contains("申請のポイント"));
    }

    #[test]
    fn detailed_prompt_embeds_full_field_set() {
        let prompt = build_detailed_description_prompt(&sample_subsidy());
        assert!(prompt.contains("800文字程度"));
        assert!(prompt.contains("利用目的: 生産性向上"));
        assert!(prompt.contains("対象従業員数: 20名以下"));
        assert!(prompt.contains("実施期間:  〜 "));
        assert!(prompt.contains("5. 活用のメリット"));
    }

    #[test]
    fn tags_prompt_requests_comma_separated_keywords() {
        let prompt = build_tags_prompt(&sample_subsidy());
        assert!(prompt.contains("5〜10個"));
        assert!(prompt.contains("カンマ区切り"));
        assert!(prompt.contains("タグのみを出力"));
    }

    #[test]
    fn parse_tags_trims_dedupes_and_drops_empty() {
        let tags = parse_tags_response("IT, デジタル化, , 製造業,製造業");
        assert_eq!(tags, vec!["IT", "デジタル化", "製造業"]);
    }

    #[test]
    fn generate_request_uses_configured_parameters() {
        let settings = AiSettings {
            temperature: 0.3,
            max_tokens: 512,
            ..Default::default()
        };
        let body = build_generate_request("hello", &settings);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn gemini_error_message_mentions_rate_limit_for_429() {
        let msg = gemini_error_message(429, "");
        assert!(msg.contains("API使用量の制限"));
        assert!(msg.contains("429"));
    }

    #[tokio::test]
    async fn calls_fail_fast_without_api_key() {
        let client = GeminiClient::new(AiSettings::default());
        assert!(!client.is_configured());
        let err = client.summary(&sample_subsidy()).await.unwrap_err();
        assert!(matches!(err, AiError::NotConfigured));
        let check = client.test_connection().await;
        assert!(!check.success);
    }

    #[tokio::test]
    async fn tags_short_circuit_when_disabled() {
        let settings = AiSettings {
            api_key: "key".into(),
            enable_ai_tags: false,
            ..Default::default()
        };
        let client = GeminiClient::new(settings);
        let tags = client.tags(&sample_subsidy()).await.unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn format_yen_inserts_separators() {
        assert_eq!(format_yen(0), "0");
        assert_eq!(format_yen(1000), "1,000");
        assert_eq!(format_yen(12_500_000), "12,500,000");
    }
}
