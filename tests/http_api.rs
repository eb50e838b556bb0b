//! End-to-end tests for the HTTP surface.
//!
//! The schedulers run against an in-process executor wrapping the real
//! lorem-ipsum model, so request batching, status mapping, and cache
//! interplay are exercised without spawning worker processes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use figmentator::cache::{MemoryCache, StoryCache};
use figmentator::config::SchedulerSettings;
use figmentator::figment::registry::PluginRegistry;
use figmentator::figment::resource::{BatchExecutor, ExecutorFactory};
use figmentator::figment::scheduler::{FigmentScheduler, SchedulerCollection};
use figmentator::figment::Figmentator;
use figmentator::http::{self, AppState};
use figmentator::models::figment::FigmentContext;
use figmentator::models::story::SceneEntry;
use figmentator::SuggestionType;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

/// Runs a registry model inside the test process.
struct InProcessExecutor {
    model: tokio::sync::Mutex<Box<dyn Figmentator>>,
}

#[async_trait]
impl BatchExecutor for InProcessExecutor {
    async fn preprocess(
        &self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> figmentator::Result<serde_json::Value> {
        self.model.lock().await.preprocess(story, prior)
    }

    async fn figmentate(
        &self,
        contexts: Vec<FigmentContext>,
    ) -> figmentator::Result<Vec<FigmentContext>> {
        Ok(self.model.lock().await.figmentate(contexts))
    }

    async fn shutdown(&self) {
        self.model.lock().await.shutdown();
    }
}

struct InProcessFactory {
    plugin: &'static str,
}

#[async_trait]
impl ExecutorFactory for InProcessFactory {
    async fn build(&self) -> figmentator::Result<Box<dyn BatchExecutor>> {
        let registry = PluginRegistry::builtin();
        let mut model = registry.create(self.plugin, SuggestionType::SceneEntry)?;
        model.startup(Some(&serde_json::json!({
            "preprocess_time": 0.0,
            "generation_time": 0.0,
        })))?;
        Ok(Box::new(InProcessExecutor {
            model: tokio::sync::Mutex::new(model),
        }))
    }
}

async fn gateway(plugin: &'static str) -> (Router, Arc<dyn StoryCache>, Arc<SchedulerCollection>) {
    let scheduler = FigmentScheduler::new(
        SuggestionType::SceneEntry,
        SchedulerSettings {
            wait_time: 0.01,
            max_batch_size: 10,
            num_workers: 1,
        },
        Box::new(InProcessFactory { plugin }),
    );
    let schedulers = Arc::new(SchedulerCollection::from_schedulers([scheduler]));
    schedulers.startup().await;

    let cache: Arc<dyn StoryCache> = Arc::new(MemoryCache::new());
    let router = http::router(AppState {
        schedulers: Arc::clone(&schedulers),
        cache: Arc::clone(&cache),
    });
    (router, cache, schedulers)
}

async fn empty_gateway() -> Router {
    let schedulers = Arc::new(SchedulerCollection::from_schedulers([]));
    let cache: Arc<dyn StoryCache> = Arc::new(MemoryCache::new());
    http::router(AppState { schedulers, cache })
}

fn entry_json() -> serde_json::Value {
    serde_json::json!({
        "user_pid": "user-1",
        "seq_id": "42",
        "format": "move",
        "pretty_format": "Move",
        "character_seq_id": "7",
        "role": "character:7",
        "description": null,
    })
}

fn snapshot_request(story_id: &str) -> Request<Body> {
    let body = serde_json::json!({
        "story_id": story_id,
        "story": {"scenes": [], "title": "A Test Story"},
    });
    Request::builder()
        .method("POST")
        .uri("/story/snapshot")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn new_figment_request(story_id: &str, range: Option<&str>, entry: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!(
            "/figment/{story_id}/new?suggestion_type=scene_entry"
        ))
        .header("content-type", "application/json");
    if let Some(range) = range {
        builder = builder.header("Range", range);
    }
    builder.body(Body::from(entry.to_string())).unwrap()
}

async fn response_entry(response: axum::response::Response) -> SceneEntry {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn snapshot_preprocesses_and_caches_the_story() {
    let (router, cache, schedulers) = gateway("simple").await;

    let response = router.oneshot(snapshot_request("s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The simple model's preprocess is the identity, so the cached blob is
    // the story itself.
    let blob = cache.get("scene_entry:s1").await.unwrap().unwrap();
    assert_eq!(blob["title"], "A Test Story");
    schedulers.shutdown().await;
}

#[tokio::test]
async fn snapshot_without_figmentators_is_not_acceptable() {
    let router = empty_gateway().await;
    let response = router.oneshot(snapshot_request("s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn word_range_returns_partial_content_with_five_words() {
    let (router, _cache, schedulers) = gateway("simple").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    let response = router
        .oneshot(new_figment_request("s1", Some("words=0-4"), &entry_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let entry = response_entry(response).await;
    let words: Vec<&str> = entry.description_text().split_whitespace().collect();
    assert_eq!(
        words,
        vec!["Lorem", "ipsum", "dolor", "sit", "amet,"]
    );
    schedulers.shutdown().await;
}

#[tokio::test]
async fn serial_token_ranges_stay_aligned() {
    let (router, _cache, schedulers) = gateway("simple").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(new_figment_request("s1", Some("tokens=0-0"), &entry_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let first = response_entry(response).await;
    assert_eq!(first.description_text().split_whitespace().count(), 1);

    // The next request picks up where the returned description left off.
    let second_body = serde_json::to_value(&first).unwrap();
    let response = router
        .oneshot(new_figment_request("s1", Some("tokens=1-1"), &second_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let second = response_entry(response).await;
    assert_eq!(second.description_text().split_whitespace().count(), 2);
    schedulers.shutdown().await;
}

#[tokio::test]
async fn missing_snapshot_is_not_found() {
    let (router, _cache, schedulers) = gateway("simple").await;
    let response = router
        .oneshot(new_figment_request(
            "s_missing",
            Some("words=0-4"),
            &entry_json(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    schedulers.shutdown().await;
}

#[tokio::test]
async fn invalid_range_unit_is_not_satisfiable() {
    let (router, _cache, schedulers) = gateway("simple").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    let response = router
        .oneshot(new_figment_request("s1", Some("parrots=0-0"), &entry_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    schedulers.shutdown().await;
}

#[tokio::test]
async fn misaligned_range_start_fails_the_figment() {
    let (router, _cache, schedulers) = gateway("simple").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    // The entry's description is empty, so a start of 5 cannot line up.
    let response = router
        .oneshot(new_figment_request("s1", Some("words=5-9"), &entry_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    schedulers.shutdown().await;
}

#[tokio::test]
async fn character_entry_pipeline_completes_and_trims() {
    let (router, _cache, schedulers) = gateway("lorem_character").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    // Under the word tokenizer, "amet," splits into a word and a comma, so
    // the generated text overshoots the five-chunk demand: completed, with
    // the trailing comma trimmed off at the chunk boundary.
    let response = router
        .oneshot(new_figment_request("s1", Some("words=0-4"), &entry_json()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entry = response_entry(response).await;
    assert_eq!(entry.description_text(), "Lorem ipsum dolor sit amet");
    schedulers.shutdown().await;
}

#[tokio::test]
async fn gzip_compressed_bodies_are_accepted() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let (router, cache, schedulers) = gateway("simple").await;

    let body = serde_json::json!({
        "story_id": "s-gz",
        "story": {"title": "Compressed"},
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.to_string().as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/story/snapshot")
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .body(Body::from(compressed))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let blob = cache.get("scene_entry:s-gz").await.unwrap().unwrap();
    assert_eq!(blob["title"], "Compressed");
    schedulers.shutdown().await;
}

#[tokio::test]
async fn unknown_suggestion_type_is_not_acceptable() {
    let (router, _cache, schedulers) = gateway("simple").await;
    let request = Request::builder()
        .method("POST")
        .uri("/figment/s1/new?suggestion_type=parrot_entry")
        .header("content-type", "application/json")
        .body(Body::from(entry_json().to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    schedulers.shutdown().await;
}

#[tokio::test]
async fn passthrough_fields_survive_the_round_trip() {
    let (router, _cache, schedulers) = gateway("simple").await;
    router
        .clone()
        .oneshot(snapshot_request("s1"))
        .await
        .unwrap();

    let mut entry = entry_json();
    entry.as_object_mut().unwrap().insert(
        "hand_context".to_owned(),
        serde_json::json!({"pre": ["card-1"], "post": []}),
    );
    let response = router
        .oneshot(new_figment_request("s1", Some("words=0-4"), &entry))
        .await
        .unwrap();

    let returned = response_entry(response).await;
    assert_eq!(
        returned.extra["hand_context"],
        serde_json::json!({"pre": ["card-1"], "post": []})
    );
    schedulers.shutdown().await;
}
