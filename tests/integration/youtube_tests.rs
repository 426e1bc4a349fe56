//! HTTP mapping tests for the YouTube client
//!
//! The client is blocking, so each call runs on `spawn_blocking` while the
//! mock server keeps serving from the test runtime.

use quota_harvest::config::{CrawlerConfig, SourceConfig};
use quota_harvest::credentials::{Credential, CredentialPool};
use quota_harvest::crawler::Orchestrator;
use quota_harvest::retry::RetryPolicy;
use quota_harvest::source::{SourceClient, SourceError, YouTubeClient};
use quota_harvest::state::EntityStatus;
use quota_harvest::storage::{SqliteStorage, Storage};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(base_url: &str) -> YouTubeClient {
    YouTubeClient::new(&SourceConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
    })
    .expect("Failed to build client")
}

fn credential() -> Credential {
    Credential::new("k1", "secret-1", 10_000)
}

fn api_error(status: u16, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": {
            "code": status,
            "message": reason,
            "errors": [{ "reason": reason, "domain": "youtube" }]
        }
    }))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_channel_details_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("id", "UC1"))
        .and(query_param("key", "secret-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "UC1",
                "snippet": {
                    "title": "Demo Channel",
                    "description": "Business enquiries: hello@demo.tv",
                    "customUrl": "@demo",
                    "publishedAt": "2020-01-01T00:00:00Z",
                    "country": "VN",
                    "thumbnails": { "default": { "url": "https://img.example/a.jpg" } }
                },
                "statistics": { "subscriberCount": "1200", "videoCount": "3", "viewCount": "99" },
                "topicDetails": { "topicIds": ["/m/04rlf"] },
                "brandingSettings": { "image": { "bannerExternalUrl": "https://img.example/b.jpg" } },
                "contentDetails": { "relatedPlaylists": { "uploads": "UU1" } }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = server.uri();
    let page = tokio::task::spawn_blocking(move || {
        client_for(&base_url).parent_details(&credential(), &["UC1".to_string()])
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(page.cost, 1);
    assert!(page.is_last());
    let parent = &page.items[0];
    assert_eq!(parent.external_id, "UC1");
    assert_eq!(parent.title.as_deref(), Some("Demo Channel"));
    assert_eq!(parent.email.as_deref(), Some("hello@demo.tv"));
    assert_eq!(parent.custom_url.as_deref(), Some("@demo"));
    assert_eq!(parent.published_at, Some(1_577_836_800));
    assert_eq!(parent.subscriber_count, Some(1200));
    assert_eq!(parent.topics, Some(vec!["/m/04rlf".to_string()]));
    assert_eq!(parent.banner_url.as_deref(), Some("https://img.example/b.jpg"));
    assert_eq!(parent.collection_id.as_deref(), Some("UU1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_classes_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(api_error(403, "quotaExceeded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/commentThreads"))
        .respond_with(api_error(403, "commentsDisabled"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/playlistItems"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let base_url = server.uri();
    let errors = tokio::task::spawn_blocking(move || {
        let client = client_for(&base_url);
        let cred = credential();
        vec![
            client.search(&cred, "demo", None, 50).map(|_| ()),
            client.leaf_page(&cred, "v1", None).map(|_| ()),
            client.child_details(&cred, &["v1".to_string()]).map(|_| ()),
            client.expand_page(&cred, "UU1", None).map(|_| ()),
        ]
    })
    .await
    .unwrap();

    assert!(matches!(errors[0], Err(SourceError::BudgetExceeded { .. })));
    assert!(matches!(errors[1], Err(SourceError::NotFound(_))));
    assert!(matches!(errors[2], Err(SourceError::Transient(_))));
    assert!(matches!(errors[3], Err(SourceError::Malformed(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolve_parent_falls_back_to_search() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("forHandle", "@demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "UC9" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("forUsername", "legacyname"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("type", "channel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": { "kind": "youtube#channel", "channelId": "UC7" },
                "snippet": { "title": "Legacy" }
            }]
        })))
        .mount(&server)
        .await;

    let base_url = server.uri();
    let (by_handle, by_search) = tokio::task::spawn_blocking(move || {
        let client = client_for(&base_url);
        let cred = credential();
        (
            client.resolve_parent(&cred, "@demo"),
            client.resolve_parent(&cred, "legacyname"),
        )
    })
    .await
    .unwrap();

    let by_handle = by_handle.unwrap();
    assert_eq!(by_handle.items, vec!["UC9".to_string()]);
    assert_eq!(by_handle.cost, 1);

    let by_search = by_search.unwrap();
    assert_eq!(by_search.items, vec!["UC7".to_string()]);
    assert_eq!(by_search.cost, 101);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_child_crawl_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", "vid1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "vid1",
                "snippet": {
                    "channelId": "UC1",
                    "title": "First upload",
                    "publishedAt": "2021-05-01T12:00:00Z",
                    "tags": ["a", "b"],
                    "categoryId": "22",
                    "thumbnails": { "high": { "url": "https://img.example/v.jpg" } }
                },
                "statistics": { "viewCount": "10", "likeCount": "2", "commentCount": "2" },
                "contentDetails": { "duration": "PT1M3S" },
                "status": { "privacyStatus": "public", "madeForKids": false }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/commentThreads"))
        .and(query_param("videoId", "vid1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "snippet": {
                    "videoId": "vid1",
                    "totalReplyCount": 1,
                    "topLevelComment": {
                        "id": "c1",
                        "snippet": {
                            "videoId": "vid1",
                            "authorDisplayName": "ann",
                            "textOriginal": "first!",
                            "likeCount": 3,
                            "publishedAt": "2021-05-02T00:00:00Z"
                        }
                    }
                },
                "replies": {
                    "comments": [{
                        "id": "c1.r1",
                        "snippet": { "parentId": "c1", "authorDisplayName": "bob", "textOriginal": "hi ann" }
                    }]
                }
            }]
        })))
        .mount(&server)
        .await;

    let base_url = server.uri();
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");

    let (report, storage) = tokio::task::spawn_blocking(move || {
        let storage = SqliteStorage::new(&db_path).unwrap();
        storage
            .add_credential(&Credential::new("k1", "secret-1", 10_000))
            .unwrap();
        let pool = CredentialPool::from_records(storage.load_credentials().unwrap());
        let source = client_for(&base_url);
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let settings = CrawlerConfig::default();

        let report = Orchestrator::new(&storage, &pool, &source, &retry, &settings)
            .run_for_child_id("vid1")
            .unwrap();
        (report, storage)
    })
    .await
    .unwrap();

    assert_eq!(report.children, 1);
    assert_eq!(report.leaves, 2);
    assert_eq!(report.quota.total(), 2);

    let child = storage.get_child("vid1").unwrap().unwrap();
    assert_eq!(child.status, EntityStatus::CrawledLeaf);
    assert_eq!(child.parent_external_id, "UC1");
    assert_eq!(child.duration.as_deref(), Some("PT1M3S"));
    assert_eq!(child.tags, Some(vec!["a".to_string(), "b".to_string()]));

    let reply = storage.get_leaf("c1.r1").unwrap().unwrap();
    assert_eq!(reply.child_external_id, "vid1");
    assert_eq!(reply.parent_leaf_id.as_deref(), Some("c1"));
    assert_eq!(reply.text.as_deref(), Some("hi ann"));
}
