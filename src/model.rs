use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application window status of a subsidy, derived from the parsed
/// application start/end dates at normalization time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubsidyStatus {
    Open,
    Upcoming,
    Closed,
    Unknown,
}

impl SubsidyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsidyStatus::Open => "open",
            SubsidyStatus::Upcoming => "upcoming",
            SubsidyStatus::Closed => "closed",
            SubsidyStatus::Unknown => "unknown",
        }
    }
}

/// A date field from the upstream API. Parsing is best-effort: values the
/// API sends in an unexpected format keep their original text so nothing is
/// dropped during normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ApiDate {
    Parsed(NaiveDateTime),
    Raw(String),
}

impl ApiDate {
    /// Parse an upstream date string. Tries `YYYY-MM-DDTHH:MM:SSZ` first,
    /// then plain `YYYY-MM-DD`; anything else is kept verbatim. Empty input
    /// means the field was absent.
    pub fn parse(value: &str) -> Option<ApiDate> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ") {
            return Some(ApiDate::Parsed(dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Some(ApiDate::Parsed(d.and_hms_opt(0, 0, 0).expect("midnight")));
        }
        Some(ApiDate::Raw(value.to_string()))
    }

    pub fn as_naive(&self) -> Option<NaiveDateTime> {
        match self {
            ApiDate::Parsed(dt) => Some(*dt),
            ApiDate::Raw(_) => None,
        }
    }
}

impl fmt::Display for ApiDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiDate::Parsed(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            ApiDate::Raw(s) => f.write_str(s),
        }
    }
}

/// Renders an optional date for prompts and stored meta. Absent dates render
/// as an empty string, matching what the upstream omits.
pub fn format_date(date: &Option<ApiDate>) -> String {
    date.as_ref().map(|d| d.to_string()).unwrap_or_default()
}

/// One subsidy listing, normalized from the J-Grants API. Constructed fresh
/// on every fetch and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subsidy {
    pub id: String,
    pub title: String,
    pub organization: String,
    pub description: String,
    pub purpose: String,
    pub industry: Vec<String>,
    pub target_area: Vec<String>,
    pub target_employees: String,
    pub amount_min: i64,
    pub amount_max: i64,
    pub rate: String,
    pub application_start: Option<ApiDate>,
    pub application_end: Option<ApiDate>,
    pub implementation_start: Option<ApiDate>,
    pub implementation_end: Option<ApiDate>,
    pub url: String,
    pub contact: String,
    pub updated_date: Option<ApiDate>,
    pub status: SubsidyStatus,
}

/// AI-generated content for one subsidy. Fields are independent: a failed
/// generation leaves its field empty while the others are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedContent {
    pub summary: String,
    pub detailed_description: String,
    pub tags: Vec<String>,
}

/// Per-subsidy outcome of the AI batch helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchContentResult {
    pub subsidy_id: String,
    pub content: GeneratedContent,
    pub errors: Vec<String>,
}

/// Outcome of processing one subsidy (or one record id) in a batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub subsidy_id: String,
    pub success: bool,
    pub record_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    BatchCreateDrafts,
    BatchPublishPosts,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::BatchCreateDrafts => "batch_create_drafts",
            SyncAction::BatchPublishPosts => "batch_publish_posts",
        }
    }
}

/// One entry of the persisted sync history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub timestamp: NaiveDateTime,
    pub action: SyncAction,
    pub results: Vec<SyncResult>,
    pub success_count: usize,
    pub error_count: usize,
}

/// History is bounded: recording a new entry evicts the oldest beyond this.
pub const SYNC_HISTORY_LIMIT: usize = 50;

/// Result of a non-raising connectivity probe against one of the upstream
/// APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
    pub data_count: Option<usize>,
}
