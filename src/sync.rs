//! The pipeline driver: batch draft creation, batch publishing, sync
//! history, and the statistics aggregate.

use crate::gemini::ContentService;
use crate::jgrants::{SearchFilters, SubsidyService};
use crate::model::{
    GeneratedContent, Subsidy, SyncAction, SyncHistoryEntry, SyncResult, SYNC_HISTORY_LIMIT,
};
use crate::store::{self, NewRecord, Pool};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound on one batch-create run.
pub const MAX_BATCH_COUNT: usize = 50;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("取得できる助成金データがありません。")]
    NoData,
    #[error(transparent)]
    Api(#[from] crate::jgrants::ApiError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
}

/// Read-only aggregate over the record store plus live upstream probes.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total: i64,
    pub published: i64,
    pub draft: i64,
    pub last_sync: Option<String>,
    pub api_status: String,
    pub ai_status: String,
}

/// Drives one synchronization or publish run to completion. Item-level
/// failures become `SyncResult { success: false }`; only the upstream list
/// call itself aborts a whole run.
pub struct SyncManager {
    pool: Pool,
    api: Arc<dyn SubsidyService>,
    ai: Arc<dyn ContentService>,
    field_mapping: BTreeMap<String, String>,
}

impl SyncManager {
    pub fn new(
        pool: Pool,
        api: Arc<dyn SubsidyService>,
        ai: Arc<dyn ContentService>,
        field_mapping: BTreeMap<String, String>,
    ) -> Self {
        SyncManager {
            pool,
            api,
            ai,
            field_mapping,
        }
    }

    /// Fetch up to `count` listings and persist the not-yet-seen ones as
    /// draft records. Returns one result per processed listing, in API
    /// response order.
    pub async fn batch_create(
        &self,
        count: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SyncResult>, SyncError> {
        if count == 0 || count > MAX_BATCH_COUNT {
            return Err(SyncError::InvalidArgument(
                "生成件数は1〜50件の範囲で指定してください。".to_string(),
            ));
        }
        if filters.keyword.chars().count() < 2 {
            return Err(SyncError::InvalidArgument(
                "キーワードは2文字以上で入力してください。".to_string(),
            ));
        }

        let page = self.api.list(filters).await?;
        let subsidies: Vec<Subsidy> = page.subsidies.into_iter().take(count).collect();
        if subsidies.is_empty() {
            return Err(SyncError::NoData);
        }

        let mut results = Vec::with_capacity(subsidies.len());
        for subsidy in &subsidies {
            results.push(self.create_one(subsidy).await);
        }

        self.record_history(SyncAction::BatchCreateDrafts, &results).await?;
        Ok(results)
    }

    async fn create_one(&self, subsidy: &Subsidy) -> SyncResult {
        match store::find_record_by_subsidy_id(&self.pool, &subsidy.id).await {
            Ok(Some(existing)) => {
                return SyncResult {
                    subsidy_id: subsidy.id.clone(),
                    success: false,
                    record_id: Some(existing.id),
                    message: "既にレコードが存在します。".to_string(),
                };
            }
            Ok(None) => {}
            Err(err) => {
                return SyncResult {
                    subsidy_id: subsidy.id.clone(),
                    success: false,
                    record_id: None,
                    message: err.to_string(),
                };
            }
        }

        let content = self.generate_content(subsidy).await;
        let record = NewRecord::compose(subsidy, &content, &self.field_mapping);

        let record_id = match store::create_record(&self.pool, &record).await {
            Ok(id) => id,
            Err(err) => {
                return SyncResult {
                    subsidy_id: subsidy.id.clone(),
                    success: false,
                    record_id: None,
                    message: format!("レコードの作成に失敗しました: {err}"),
                };
            }
        };

        // The record exists at this point; term assignment problems are
        // logged but do not undo the creation.
        if let Err(err) = store::assign_taxonomies(&self.pool, record_id, subsidy).await {
            warn!(subsidy_id = %subsidy.id, %err, "taxonomy assignment failed");
        }
        if let Err(err) = store::set_record_tags(&self.pool, record_id, &content.tags).await {
            warn!(subsidy_id = %subsidy.id, %err, "tag assignment failed");
        }

        info!(subsidy_id = %subsidy.id, record_id, "draft created");
        SyncResult {
            subsidy_id: subsidy.id.clone(),
            success: true,
            record_id: Some(record_id),
            message: "下書きを作成しました。".to_string(),
        }
    }

    /// Best-effort AI generation: each field fails independently and a
    /// failure leaves that field empty.
    async fn generate_content(&self, subsidy: &Subsidy) -> GeneratedContent {
        let mut content = GeneratedContent::default();
        if !self.ai.is_configured() {
            return content;
        }

        match self.ai.summary(subsidy).await {
            Ok(text) => content.summary = text,
            Err(err) => warn!(subsidy_id = %subsidy.id, %err, "summary generation failed"),
        }
        match self.ai.detailed_description(subsidy).await {
            Ok(text) => content.detailed_description = text,
            Err(err) => warn!(subsidy_id = %subsidy.id, %err, "description generation failed"),
        }
        match self.ai.tags(subsidy).await {
            Ok(tags) => content.tags = tags,
            Err(err) => warn!(subsidy_id = %subsidy.id, %err, "tag generation failed"),
        }
        content
    }

    /// Publish a set of draft records. Duplicate ids are processed
    /// independently, one result per occurrence.
    pub async fn batch_publish(&self, record_ids: &[i64]) -> Result<Vec<SyncResult>, SyncError> {
        if record_ids.is_empty() {
            return Err(SyncError::InvalidArgument(
                "レコードIDが指定されていません。".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(record_ids.len());
        for &record_id in record_ids {
            results.push(self.publish_one(record_id).await);
        }

        self.record_history(SyncAction::BatchPublishPosts, &results).await?;
        Ok(results)
    }

    async fn publish_one(&self, record_id: i64) -> SyncResult {
        let record = match store::get_record(&self.pool, record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return SyncResult {
                    subsidy_id: String::new(),
                    success: false,
                    record_id: Some(record_id),
                    message: "レコードが見つかりません。".to_string(),
                };
            }
            Err(err) => {
                return SyncResult {
                    subsidy_id: String::new(),
                    success: false,
                    record_id: Some(record_id),
                    message: err.to_string(),
                };
            }
        };

        match store::publish_record(&self.pool, record_id).await {
            Ok(()) => SyncResult {
                subsidy_id: record.subsidy_id,
                success: true,
                record_id: Some(record_id),
                message: "レコードを公開しました。".to_string(),
            },
            Err(err) => SyncResult {
                subsidy_id: record.subsidy_id,
                success: false,
                record_id: Some(record_id),
                message: err.to_string(),
            },
        }
    }

    /// Prepend a history entry, evict beyond the cap, and advance the
    /// last-sync timestamp.
    pub async fn record_history(
        &self,
        action: SyncAction,
        results: &[SyncResult],
    ) -> Result<SyncHistoryEntry, SyncError> {
        let success_count = results.iter().filter(|r| r.success).count();
        let entry = SyncHistoryEntry {
            timestamp: Utc::now().naive_utc(),
            action,
            results: results.to_vec(),
            success_count,
            error_count: results.len() - success_count,
        };

        let mut history = store::load_sync_history(&self.pool).await?;
        history.insert(0, entry.clone());
        history.truncate(SYNC_HISTORY_LIMIT);
        store::save_sync_history(&self.pool, &history).await?;
        store::set_last_sync(
            &self.pool,
            &entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
        .await?;
        Ok(entry)
    }

    pub async fn history(&self) -> Result<Vec<SyncHistoryEntry>, SyncError> {
        Ok(store::load_sync_history(&self.pool).await?)
    }

    /// Record counts plus live connectivity probes against both upstream
    /// APIs. The probes run synchronously on every call.
    pub async fn statistics(&self) -> Result<Statistics, SyncError> {
        let counts = store::count_records(&self.pool).await?;
        let last_sync = store::last_sync(&self.pool).await?;

        let api_check = self.api.test_connection().await;
        let ai_check = self.ai.test_connection().await;

        Ok(Statistics {
            total: counts.total,
            published: counts.published,
            draft: counts.draft,
            last_sync,
            api_status: connection_status(api_check.success),
            ai_status: connection_status(ai_check.success),
        })
    }
}

fn connection_status(success: bool) -> String {
    if success { "connected" } else { "error" }.to_string()
}
