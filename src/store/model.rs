use crate::model::{format_date, GeneratedContent, Subsidy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words kept when falling back to a truncated excerpt.
const EXCERPT_WORD_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Published,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Published => "published",
        }
    }

    pub fn parse_status(value: &str) -> Option<RecordStatus> {
        match value {
            "draft" => Some(RecordStatus::Draft),
            "published" => Some(RecordStatus::Published),
            _ => None,
        }
    }
}

/// Row view of a stored record.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: i64,
    pub subsidy_id: String,
    pub title: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub total: i64,
    pub published: i64,
    pub draft: i64,
}

/// A record ready for insertion, composed from a subsidy and its generated
/// content.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub subsidy_id: String,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub meta: Vec<(String, String)>,
}

impl NewRecord {
    /// Compose the destination record. The AI description takes precedence
    /// over the raw outline for the body; the AI summary over a truncated
    /// outline for the excerpt. `field_mapping` copies additional fields into
    /// custom meta; empty targets and empty values are skipped.
    pub fn compose(
        subsidy: &Subsidy,
        content: &GeneratedContent,
        field_mapping: &BTreeMap<String, String>,
    ) -> NewRecord {
        let body = if !content.detailed_description.is_empty() {
            content.detailed_description.clone()
        } else {
            subsidy.description.clone()
        };
        let excerpt = if !content.summary.is_empty() {
            content.summary.clone()
        } else {
            trim_words(&subsidy.description, EXCERPT_WORD_LIMIT)
        };

        let mut meta = vec![
            ("jgrants_subsidy_id".to_string(), subsidy.id.clone()),
            ("jgrants_organization".to_string(), subsidy.organization.clone()),
            ("jgrants_amount_min".to_string(), subsidy.amount_min.to_string()),
            ("jgrants_amount_max".to_string(), subsidy.amount_max.to_string()),
            ("jgrants_rate".to_string(), subsidy.rate.clone()),
            (
                "jgrants_application_start".to_string(),
                format_date(&subsidy.application_start),
            ),
            (
                "jgrants_application_end".to_string(),
                format_date(&subsidy.application_end),
            ),
            (
                "jgrants_implementation_start".to_string(),
                format_date(&subsidy.implementation_start),
            ),
            (
                "jgrants_implementation_end".to_string(),
                format_date(&subsidy.implementation_end),
            ),
            ("jgrants_url".to_string(), subsidy.url.clone()),
            ("jgrants_contact".to_string(), subsidy.contact.clone()),
            ("jgrants_status".to_string(), subsidy.status.as_str().to_string()),
            (
                "jgrants_updated_date".to_string(),
                format_date(&subsidy.updated_date),
            ),
        ];

        for (api_field, target) in field_mapping {
            if target.trim().is_empty() {
                continue;
            }
            let value = mapped_field_value(api_field, subsidy, content);
            match value {
                Some(v) if !v.is_empty() => meta.push((target.clone(), v)),
                _ => {}
            }
        }

        NewRecord {
            subsidy_id: subsidy.id.clone(),
            title: subsidy.title.clone(),
            body,
            excerpt,
            meta,
        }
    }
}

/// Value of a canonical field by its mapping name. Unknown names yield
/// nothing and the mapping entry is skipped.
fn mapped_field_value(
    api_field: &str,
    subsidy: &Subsidy,
    content: &GeneratedContent,
) -> Option<String> {
    let value = match api_field {
        "title" => subsidy.title.clone(),
        "organization" => subsidy.organization.clone(),
        "description" => subsidy.description.clone(),
        "purpose" => subsidy.purpose.clone(),
        "amount_min" => subsidy.amount_min.to_string(),
        "amount_max" => subsidy.amount_max.to_string(),
        "rate" => subsidy.rate.clone(),
        "application_start" => format_date(&subsidy.application_start),
        "application_end" => format_date(&subsidy.application_end),
        "implementation_start" => format_date(&subsidy.implementation_start),
        "implementation_end" => format_date(&subsidy.implementation_end),
        "url" => subsidy.url.clone(),
        "contact" => subsidy.contact.clone(),
        "ai_summary" => content.summary.clone(),
        "ai_description" => content.detailed_description.clone(),
        "industry" => subsidy.industry.join(", "),
        "target_area" => subsidy.target_area.join(", "),
        "target_employees" => subsidy.target_employees.clone(),
        "status" => subsidy.status.as_str().to_string(),
        _ => return None,
    };
    Some(value)
}

/// Whitespace-word truncation with an ellipsis, used for the fallback
/// excerpt. Text without whitespace to split on (typical Japanese prose)
/// is capped at `limit` characters instead.
fn trim_words(text: &str, limit: usize) -> String {
    let text = text.trim();
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 1 {
        if words.len() <= limit {
            return text.to_string();
        }
        let mut out = words[..limit].join(" ");
        out.push('…');
        return out;
    }

    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push('…');
    out
}
