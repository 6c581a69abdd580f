use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use travel_content::{
    AssetResolver, CacheConfig, ContentCache, ContentError, ContentResult, ContentService,
    ContentSource, EntityKind, ManualClock, Payload, QueryOptions, TtlTable,
};

const ASSETS: &str = "https://cms.example.com";

// In-memory CMS: answers `items/<collection>` from fixtures, counts calls and
// honours `filter[slug][_eq]`
struct MockCms {
    collections: HashMap<String, Vec<Value>>,
    calls: AtomicUsize,
    fail_next: AtomicUsize,
    delay: Duration,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MockCms {
    fn new(delay: Duration) -> Self {
        let mut collections = HashMap::new();
        collections.insert(
            "hotels".to_string(),
            vec![
                json!({
                    "id": 1,
                    "slug": "the-comodo",
                    "name": "The Comodo",
                    "stars": 5,
                    "featured_image": { "id": "img-comodo" },
                    "gallery": [{ "image": "f1" }, "f2"],
                    "translations": [
                        { "id": 10, "hotels_id": 1, "languages_code": "de-DE", "name": "Das Comodo", "description": null },
                        { "id": 11, "hotels_id": 1, "languages_code": "fr-FR", "name": "Le Comodo" }
                    ]
                }),
                json!({ "id": 2, "title": "Seaside Retreat", "slug": "seaside" }),
            ],
        );
        collections.insert(
            "destinations".to_string(),
            vec![json!({ "id": 5, "name": "Lisbon", "slug": "lisbon", "hero_image": "hero-lx" })],
        );
        collections.insert(
            "categories".to_string(),
            vec![json!({ "id": 7, "name": "Spa" })],
        );
        collections.insert(
            "navigation".to_string(),
            vec![json!({ "id": 1, "title": "Home", "url": "/" })],
        );
        collections.insert(
            "translations".to_string(),
            vec![
                json!({ "key": "book_now", "value": "Jetzt buchen" }),
                json!({ "key": "nights", "value": 3 }),
                json!({ "key": "missing", "value": null }),
            ],
        );

        Self {
            collections,
            calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            delay,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn last_params(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .last()
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentSource for MockCms {
    async fn fetch(&self, endpoint: &str, params: &[(String, String)]) -> ContentResult<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push((endpoint.to_string(), params.to_vec()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ContentError::Upstream {
                status: 500,
                body: Some("Internal Server Error".to_string()),
            });
        }

        let collection = endpoint.trim_start_matches("items/");
        let records = self.collections.get(collection).cloned().unwrap_or_default();
        let slug = params
            .iter()
            .find(|(k, _)| k == "filter[slug][_eq]")
            .map(|(_, v)| v.clone());

        let records = match slug {
            Some(slug) => records
                .into_iter()
                .filter(|r| r.get("slug").and_then(Value::as_str) == Some(slug.as_str()))
                .collect(),
            None => records,
        };
        Ok(Payload::Many(records))
    }
}

fn service_with(cms: Arc<MockCms>, clock: Arc<ManualClock>) -> ContentService {
    let cache = ContentCache::with_clock(CacheConfig::default(), clock);
    ContentService::new(
        cms,
        Arc::new(cache),
        AssetResolver::new(ASSETS),
        TtlTable::default(),
    )
}

fn setup() -> (Arc<MockCms>, Arc<ManualClock>, ContentService) {
    let cms = Arc::new(MockCms::new(Duration::ZERO));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
    ));
    let service = service_with(Arc::clone(&cms), Arc::clone(&clock));
    (cms, clock, service)
}

#[tokio::test]
async fn test_hotel_by_slug_served_from_cache_within_ttl() {
    let (cms, clock, service) = setup();

    let first = service
        .fetch_hotel_by_slug("the-comodo", "de-DE")
        .await
        .unwrap()
        .unwrap();
    clock.advance_secs(240);
    let second = service
        .fetch_hotel_by_slug("the-comodo", "de-DE")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(cms.calls(), 1);
    assert_eq!(first["name"], json!("Das Comodo"));

    clock.advance_secs(60);
    assert_ok!(service.fetch_hotel_by_slug("the-comodo", "de-DE").await);
    assert_eq!(cms.calls(), 2);
}

#[tokio::test]
async fn test_invalidation_forces_refetch() {
    let (cms, _clock, service) = setup();

    assert_ok!(service.fetch_hotel_by_slug("the-comodo", "de-DE").await);
    assert_ok!(service.fetch_hotels(QueryOptions::new(), "de-DE").await);
    assert_ok!(service.fetch_destinations(QueryOptions::new(), "de-DE").await);
    assert_eq!(cms.calls(), 3);

    let removed = service.invalidate_entity_cache(EntityKind::Hotel, Some("the-comodo"));
    assert_eq!(removed, 2);

    assert_ok!(service.fetch_hotel_by_slug("the-comodo", "de-DE").await);
    assert_eq!(cms.calls(), 4);

    // destinations were untouched
    assert_ok!(service.fetch_destinations(QueryOptions::new(), "de-DE").await);
    assert_eq!(cms.calls(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_slug_lookups_issue_one_request() {
    let cms = Arc::new(MockCms::new(Duration::from_millis(100)));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = Arc::new(service_with(Arc::clone(&cms), clock));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.fetch_hotel_by_slug("the-comodo", "en-US").await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(cms.calls(), 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(results[0].is_some());
}

#[tokio::test]
async fn test_unknown_slug_is_none_not_error() {
    let (_cms, _clock, service) = setup();
    let hotel = service.fetch_hotel_by_slug("nowhere", "en-US").await.unwrap();
    assert!(hotel.is_none());
    assert!(service.fetch_page_by_slug("  ", "en-US").await.unwrap().is_none());
}

#[tokio::test]
async fn test_upstream_failure_propagates_and_is_not_cached() {
    let (cms, _clock, service) = setup();
    cms.fail_next(1);

    let err = assert_err!(service.fetch_hotels(QueryOptions::new(), "en-US").await);
    assert_eq!(err.status(), Some(500));
    assert_eq!(service.cache().pending_count(), 0);

    let hotels = service.fetch_hotels(QueryOptions::new(), "en-US").await.unwrap();
    assert_eq!(hotels.len(), 2);
    assert_eq!(cms.calls(), 2);
}

#[tokio::test]
async fn test_list_is_normalized_per_locale() {
    let (cms, _clock, service) = setup();

    let hotels = service.fetch_hotels(QueryOptions::new(), "fr-FR").await.unwrap();
    assert_eq!(hotels[0]["name"], json!("Le Comodo"));
    assert_eq!(
        hotels[0]["featured_image_url"],
        json!(format!("{ASSETS}/assets/img-comodo"))
    );
    assert_eq!(
        hotels[0]["gallery"],
        json!([
            { "image": "f1", "url": format!("{ASSETS}/assets/f1") },
            { "id": "f2", "url": format!("{ASSETS}/assets/f2") }
        ])
    );
    assert_eq!(hotels[1]["name"], json!("Seaside Retreat"));
    assert_eq!(hotels[1]["status"], json!("published"));

    let params = cms.last_params();
    assert!(params.contains(&("fields".to_string(), "*,translations.*".to_string())));
    assert!(params.contains(&(
        "deep[translations][_filter][languages_code][_eq]".to_string(),
        "fr-FR".to_string()
    )));

    // untranslated locale keeps raw values and has its own cache entry
    let hotels = service.fetch_hotels(QueryOptions::new(), "it-IT").await.unwrap();
    assert_eq!(hotels[0]["name"], json!("The Comodo"));
    assert_eq!(cms.calls(), 2);
}

#[tokio::test]
async fn test_equivalent_options_share_cache_entry() {
    let (cms, _clock, service) = setup();

    let dynamic = QueryOptions::from_json(&json!({
        "filter": { "stars": 5, "status": { "_eq": "published" } },
        "limit": 10
    }))
    .unwrap();
    let typed = QueryOptions::new()
        .limit(10)
        .filter_eq("status", "published")
        .filter_eq("stars", 5);

    assert_ok!(service.fetch_hotels(dynamic, "en-US").await);
    assert_ok!(service.fetch_hotels(typed, "en-US").await);
    assert_eq!(cms.calls(), 1);
}

#[tokio::test]
async fn test_disallowed_field_rejected_before_fetch() {
    let (cms, _clock, service) = setup();
    let err = assert_err!(
        service
            .fetch_hotels(QueryOptions::new().fields(["secret_notes"]), "en-US")
            .await
    );
    assert!(matches!(err, ContentError::InvalidQuery(_)));
    assert_eq!(cms.calls(), 0);
}

#[tokio::test]
async fn test_translation_strings_and_invalidation() {
    let (cms, _clock, service) = setup();

    let strings = service.fetch_translation_strings("de-DE").await.unwrap();
    assert_eq!(strings.get("book_now").map(String::as_str), Some("Jetzt buchen"));
    assert_eq!(strings.get("nights").map(String::as_str), Some("3"));
    assert!(!strings.contains_key("missing"));
    assert!(cms
        .last_params()
        .contains(&("filter[languages_code][_eq]".to_string(), "de-DE".to_string())));

    assert_ok!(service.fetch_translations("de-DE").await);
    assert_eq!(cms.calls(), 1);

    assert_eq!(
        service.invalidate_entity_cache(EntityKind::Translation, Some("fr-FR")),
        1
    );
    assert_ok!(service.fetch_translations("de-DE").await);
    assert_eq!(cms.calls(), 2);
}

#[tokio::test]
async fn test_warm_populates_list_views() {
    let (cms, _clock, service) = setup();
    service.warm("en-US").await.unwrap();
    assert_eq!(cms.calls(), 5);

    let destinations = service
        .fetch_destinations(QueryOptions::new(), "en-US")
        .await
        .unwrap();
    assert_eq!(
        destinations[0]["hero_image_url"],
        json!(format!("{ASSETS}/assets/hero-lx"))
    );
    assert_eq!(service.fetch_navigation("en-US").await.unwrap()[0]["name"], json!("Home"));
    assert_eq!(
        service.fetch_categories(QueryOptions::new(), "en-US").await.unwrap()[0]["slug"],
        json!("item-7")
    );
    assert_eq!(cms.calls(), 5);
}
