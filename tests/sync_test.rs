use async_trait::async_trait;
use jgrants_sync::gemini::{AiError, ContentService};
use jgrants_sync::jgrants::{ApiError, ListResult, SearchFilters, SubsidyService};
use jgrants_sync::model::{ConnectionCheck, Subsidy, SubsidyStatus, SyncAction, SyncResult};
use jgrants_sync::store;
use jgrants_sync::sync::{SyncError, SyncManager};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> store::Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn subsidy(id: &str) -> Subsidy {
    Subsidy {
        id: id.into(),
        title: format!("補助金 {id}"),
        organization: "テスト機関".into(),
        description: "概要テキスト".into(),
        purpose: "".into(),
        industry: vec!["製造業".into()],
        target_area: vec!["東京都".into()],
        target_employees: "".into(),
        amount_min: 0,
        amount_max: 1_000_000,
        rate: "1/2以内".into(),
        application_start: None,
        application_end: None,
        implementation_start: None,
        implementation_end: None,
        url: "".into(),
        contact: "".into(),
        updated_date: None,
        status: SubsidyStatus::Unknown,
    }
}

fn page(ids: &[&str]) -> ListResult {
    ListResult {
        metadata: Value::Null,
        subsidies: ids.iter().map(|id| subsidy(id)).collect(),
    }
}

#[derive(Clone, Default)]
struct RecordingApi {
    responses: Arc<Mutex<VecDeque<Result<ListResult, ApiError>>>>,
    list_calls: Arc<Mutex<Vec<SearchFilters>>>,
}

impl RecordingApi {
    fn with_responses(responses: Vec<Result<ListResult, ApiError>>) -> Self {
        RecordingApi {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn list_call_count(&self) -> usize {
        self.list_calls.lock().await.len()
    }
}

#[async_trait]
impl SubsidyService for RecordingApi {
    async fn list(&self, filters: &SearchFilters) -> Result<ListResult, ApiError> {
        self.list_calls.lock().await.push(filters.clone());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(page(&[])))
    }

    async fn detail(&self, subsidy_id: &str) -> Result<Subsidy, ApiError> {
        Ok(subsidy(subsidy_id))
    }

    async fn test_connection(&self) -> ConnectionCheck {
        ConnectionCheck {
            success: true,
            message: "ok".into(),
            data_count: Some(0),
        }
    }
}

/// Scripted AI service: `None` in a field means that generation fails.
#[derive(Clone)]
struct ScriptedAi {
    configured: bool,
    summary: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
}

impl ScriptedAi {
    fn unconfigured() -> Self {
        ScriptedAi {
            configured: false,
            summary: None,
            description: None,
            tags: None,
        }
    }
}

#[async_trait]
impl ContentService for ScriptedAi {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn summary(&self, _subsidy: &Subsidy) -> Result<String, AiError> {
        self.summary.clone().ok_or(AiError::Http {
            status: 503,
            message: "unavailable".into(),
        })
    }

    async fn detailed_description(&self, _subsidy: &Subsidy) -> Result<String, AiError> {
        self.description.clone().ok_or(AiError::Http {
            status: 503,
            message: "unavailable".into(),
        })
    }

    async fn tags(&self, _subsidy: &Subsidy) -> Result<Vec<String>, AiError> {
        self.tags.clone().ok_or(AiError::Http {
            status: 503,
            message: "unavailable".into(),
        })
    }

    async fn test_connection(&self) -> ConnectionCheck {
        ConnectionCheck {
            success: self.configured,
            message: String::new(),
            data_count: None,
        }
    }
}

fn manager(pool: &store::Pool, api: RecordingApi, ai: ScriptedAi) -> SyncManager {
    SyncManager::new(pool.clone(), Arc::new(api), Arc::new(ai), BTreeMap::new())
}

#[tokio::test]
async fn batch_create_persists_drafts_and_history() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A", "B", "C"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let results = m
        .batch_create(5, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(
        results.iter().map(|r| r.subsidy_id.as_str()).collect::<Vec<_>>(),
        vec!["A", "B", "C"]
    );
    for r in &results {
        assert!(store::record_exists(&pool, &r.subsidy_id).await.unwrap());
    }

    let history = store::load_sync_history(&pool).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, SyncAction::BatchCreateDrafts);
    assert_eq!(history[0].success_count, 3);
    assert_eq!(history[0].error_count, 0);
    assert!(store::last_sync(&pool).await.unwrap().is_some());
}

#[tokio::test]
async fn second_run_skips_existing_records() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![
        Ok(page(&["A", "B"])),
        Ok(page(&["A", "B"])),
    ]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());
    let filters = SearchFilters::for_keyword("デジタル");

    let first = m.batch_create(10, &filters).await.unwrap();
    assert!(first.iter().all(|r| r.success));

    let second = m.batch_create(10, &filters).await.unwrap();
    assert_eq!(second.len(), 2);
    for r in &second {
        assert!(!r.success);
        assert!(r.record_id.is_some());
        assert!(r.message.contains("既に"));
    }

    // No duplicate records were created.
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn count_limits_processed_items_in_order() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A", "B", "C", "D", "E"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let results = m
        .batch_create(2, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    assert_eq!(
        results.iter().map(|r| r.subsidy_id.as_str()).collect::<Vec<_>>(),
        vec!["A", "B"]
    );
    assert!(!store::record_exists(&pool, "C").await.unwrap());
}

#[tokio::test]
async fn empty_upstream_page_is_no_data() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&[]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let err = m
        .batch_create(10, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoData));
}

#[tokio::test]
async fn invalid_keyword_rejected_before_any_api_call() {
    let pool = setup_pool().await;
    let api = RecordingApi::default();
    let m = manager(&pool, api.clone(), ScriptedAi::unconfigured());

    let err = m
        .batch_create(10, &SearchFilters::for_keyword("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidArgument(_)));
    assert_eq!(api.list_call_count().await, 0);
}

#[tokio::test]
async fn invalid_count_rejected_before_any_api_call() {
    let pool = setup_pool().await;
    let api = RecordingApi::default();
    let m = manager(&pool, api.clone(), ScriptedAi::unconfigured());

    for count in [0, 51] {
        let err = m
            .batch_create(count, &SearchFilters::for_keyword("デジタル"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }
    assert_eq!(api.list_call_count().await, 0);
}

#[tokio::test]
async fn list_failure_aborts_whole_run() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Err(ApiError::Http {
        status: 503,
        message: "down".into(),
    })]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let err = m
        .batch_create(10, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Api(_)));
    assert!(store::load_sync_history(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_ai_failure_keeps_summary_and_falls_back_for_body() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A"]))]);
    let ai = ScriptedAi {
        configured: true,
        summary: Some("AI要約".into()),
        description: None, // generation fails
        tags: Some(vec!["IT".into(), "製造業".into()]),
    };
    let m = manager(&pool, api, ai);

    let results = m
        .batch_create(1, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    assert!(results[0].success);
    let record_id = results[0].record_id.unwrap();

    let (body, excerpt): (String, String) =
        sqlx::query_as("SELECT body, excerpt FROM records WHERE id = ?")
            .bind(record_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(body, "概要テキスト");
    assert_eq!(excerpt, "AI要約");

    let tags = store::term_names(&pool, record_id, "tag").await.unwrap();
    assert_eq!(tags, vec!["IT", "製造業"]);
}

#[tokio::test]
async fn created_records_get_category_and_prefecture_terms() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let results = m
        .batch_create(1, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    let record_id = results[0].record_id.unwrap();

    assert_eq!(
        store::term_names(&pool, record_id, "category").await.unwrap(),
        vec!["manufacturing"]
    );
    assert_eq!(
        store::term_names(&pool, record_id, "prefecture").await.unwrap(),
        vec!["東京都"]
    );
}

#[tokio::test]
async fn batch_publish_rejects_empty_input() {
    let pool = setup_pool().await;
    let m = manager(&pool, RecordingApi::default(), ScriptedAi::unconfigured());

    let err = m.batch_publish(&[]).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidArgument(_)));
    assert!(store::load_sync_history(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_publish_handles_missing_and_duplicate_ids() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A", "B"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let created = m
        .batch_create(10, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    let first = created[0].record_id.unwrap();

    let results = m.batch_publish(&[first, 9999, first]).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].message.contains("見つかりません"));
    assert!(results[2].success); // duplicates processed independently

    let status: String = sqlx::query_scalar("SELECT status FROM records WHERE id = ?")
        .bind(first)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "published");

    let history = store::load_sync_history(&pool).await.unwrap();
    assert_eq!(history[0].action, SyncAction::BatchPublishPosts);
    assert_eq!(history[0].success_count, 2);
    assert_eq!(history[0].error_count, 1);
}

#[tokio::test]
async fn history_is_capped_at_fifty_newest_first() {
    let pool = setup_pool().await;
    let m = manager(&pool, RecordingApi::default(), ScriptedAi::unconfigured());

    for i in 0..51 {
        let results = vec![SyncResult {
            subsidy_id: format!("S{i}"),
            success: true,
            record_id: None,
            message: String::new(),
        }];
        m.record_history(SyncAction::BatchCreateDrafts, &results)
            .await
            .unwrap();
    }

    let history = store::load_sync_history(&pool).await.unwrap();
    assert_eq!(history.len(), 50);
    assert_eq!(history[0].results[0].subsidy_id, "S50");
    assert_eq!(history[49].results[0].subsidy_id, "S1");
}

#[tokio::test]
async fn statistics_report_counts_and_probe_outcomes() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A", "B"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let created = m
        .batch_create(10, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    m.batch_publish(&[created[0].record_id.unwrap()]).await.unwrap();

    let stats = m.statistics().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.published, 1);
    assert_eq!(stats.draft, 1);
    assert!(stats.last_sync.is_some());
    assert_eq!(stats.api_status, "connected");
    assert_eq!(stats.ai_status, "error");
}

#[tokio::test(start_paused = true)]
async fn generate_batch_isolates_field_failures() {
    let ai = ScriptedAi {
        configured: true,
        summary: Some("AI要約".into()),
        description: None, // generation fails for every item
        tags: Some(vec!["IT".into()]),
    };

    let results = ai.generate_batch(&[subsidy("A"), subsidy("B")]).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].subsidy_id, "A");
    assert_eq!(results[1].subsidy_id, "B");
    for r in &results {
        assert_eq!(r.content.summary, "AI要約");
        assert!(r.content.detailed_description.is_empty());
        assert_eq!(r.content.tags, vec!["IT"]);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].starts_with("description:"));
    }
}

#[tokio::test]
async fn generated_content_skipped_when_ai_unconfigured() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A"]))]);
    let m = manager(&pool, api, ScriptedAi::unconfigured());

    let results = m
        .batch_create(1, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    let record_id = results[0].record_id.unwrap();

    let (body, excerpt): (String, String) =
        sqlx::query_as("SELECT body, excerpt FROM records WHERE id = ?")
            .bind(record_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(body, "概要テキスト");
    assert_eq!(excerpt, "概要テキスト");
    assert!(store::term_names(&pool, record_id, "tag").await.unwrap().is_empty());
}

#[tokio::test]
async fn field_mapping_copies_values_into_custom_meta() {
    let pool = setup_pool().await;
    let api = RecordingApi::with_responses(vec![Ok(page(&["A"]))]);
    let mut mapping = BTreeMap::new();
    mapping.insert("organization".to_string(), "grant_org".to_string());
    mapping.insert("rate".to_string(), "".to_string()); // empty target skipped
    let m = SyncManager::new(
        pool.clone(),
        Arc::new(api),
        Arc::new(ScriptedAi::unconfigured()),
        mapping,
    );

    let results = m
        .batch_create(1, &SearchFilters::for_keyword("デジタル"))
        .await
        .unwrap();
    let record_id = results[0].record_id.unwrap();

    let org: String = sqlx::query_scalar(
        "SELECT meta_value FROM record_meta WHERE record_id = ? AND meta_key = 'grant_org'",
    )
    .bind(record_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(org, "テスト機関");

    let unused: Option<String> = sqlx::query_scalar(
        "SELECT meta_value FROM record_meta WHERE record_id = ? AND meta_key = ''",
    )
    .bind(record_id)
    .fetch_optional(&pool)
    .await
    .unwrap();
    assert!(unused.is_none());
}
