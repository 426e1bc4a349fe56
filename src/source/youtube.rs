//! HTTP client for the YouTube Data API
//!
//! Handles request building, response decoding into entity records, and the
//! classification of HTTP failures into `SourceError` classes:
//!
//! | Response | Error |
//! |----------|-------|
//! | 403 `quotaExceeded` / `dailyLimitExceeded` / `rateLimitExceeded` | BudgetExceeded |
//! | 403 `commentsDisabled` / `forbidden`, 404 | NotFound |
//! | 5xx, timeout, connection failure | Transient |
//! | Any other 4xx, undecodable body | Malformed |

use crate::config::SourceConfig;
use crate::credentials::Credential;
use crate::entity::{ChildEntity, LeafEntity, LeafThread, ParentEntity};
use crate::source::{Page, SearchHit, SourceClient, SourceError, SourceOp, SourceResult};
use chrono::DateTime;
use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Results per page for comment listings
const LEAF_PAGE_SIZE: usize = 100;

/// Results per page for collection listings
const EXPAND_PAGE_SIZE: usize = 50;

const BUDGET_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded", "rateLimitExceeded"];
const NOT_FOUND_REASONS: &[&str] = &["commentsDisabled", "forbidden", "videoNotFound", "channelNotFound"];

/// Blocking YouTube Data API v3 client
pub struct YouTubeClient {
    client: Client,
    base_url: Url,
}

impl YouTubeClient {
    /// Builds a client from the `[source]` configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Base url and request timeout
    ///
    /// # Returns
    ///
    /// * `Ok(YouTubeClient)` - Client ready to use
    /// * `Err(SourceError::Malformed)` - The base url does not parse or the client failed to build
    pub fn new(config: &SourceConfig) -> SourceResult<Self> {
        let base = config.base_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{}/", base))
            .map_err(|e| SourceError::Malformed(format!("base url {}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .user_agent(concat!("quota-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| SourceError::Malformed(format!("http client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn get<T: DeserializeOwned>(
        &self,
        op: SourceOp,
        endpoint: &str,
        credential: &Credential,
        query: &[(&str, String)],
    ) -> SourceResult<T> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        tracing::debug!(call = %op, endpoint, credential = %credential.id, "Calling source");

        let response = self
            .client
            .get(url)
            .query(query)
            .query(&[("key", credential.secret.as_str())])
            .send()
            .map_err(classify_transport)?;

        decode(response)
    }

    fn resolve_by(
        &self,
        credential: &Credential,
        param: &str,
        value: &str,
    ) -> SourceResult<Option<String>> {
        let response: ListResponse<IdOnly> = self.get(
            SourceOp::ResolveParent,
            "channels",
            credential,
            &[("part", "id".to_string()), (param, value.to_string())],
        )?;
        Ok(response.items.into_iter().next().map(|item| item.id))
    }
}

/// Maps reqwest transport failures
fn classify_transport(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Transient("request timeout".to_string())
    } else if e.is_connect() {
        SourceError::Transient(format!("connection failed: {}", e))
    } else if e.is_decode() {
        SourceError::Malformed(e.to_string())
    } else {
        SourceError::Transient(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> SourceResult<T> {
    let status = response.status();
    if status.is_success() {
        let body = response.text().map_err(classify_transport)?;
        return serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()));
    }

    let body = response.text().unwrap_or_default();
    let reason = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error.errors.into_iter().next())
        .map(|detail| detail.reason)
        .unwrap_or_default();

    Err(classify_status(status, &reason))
}

/// Maps an HTTP error status and API reason to an error class
pub(crate) fn classify_status(status: StatusCode, reason: &str) -> SourceError {
    let detail = if reason.is_empty() {
        status.to_string()
    } else {
        format!("{} ({})", status, reason)
    };

    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        if BUDGET_REASONS.contains(&reason) || status == StatusCode::TOO_MANY_REQUESTS {
            return SourceError::BudgetExceeded { reason: detail };
        }
        if NOT_FOUND_REASONS.contains(&reason) {
            return SourceError::NotFound(detail);
        }
        return SourceError::Malformed(detail);
    }
    if status == StatusCode::NOT_FOUND {
        return SourceError::NotFound(detail);
    }
    if status.is_server_error() {
        return SourceError::Transient(detail);
    }
    SourceError::Malformed(detail)
}

/// First email address found in free text
pub(crate) fn extract_email(text: &str) -> Option<String> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex")
    });
    re.find(text).map(|m| m.as_str().to_string())
}

fn unix_seconds(raw: &Option<String>) -> Option<i64> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

fn count(raw: &Option<String>) -> Option<i64> {
    raw.as_deref().and_then(|s| s.parse().ok())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

// ===== Wire types =====

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(&self) -> Option<String> {
        self.high
            .as_ref()
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    id: SearchId,
    #[serde(default)]
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    kind: String,
    channel_id: Option<String>,
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

impl SearchItem {
    fn into_hit(self) -> Option<SearchHit> {
        let snippet = self.snippet;
        match self.id.kind.as_str() {
            "youtube#channel" => {
                let id = self.id.channel_id.or(snippet.channel_id)?;
                let mut parent = ParentEntity::discovered(id);
                parent.title = non_empty(snippet.title);
                parent.description = non_empty(snippet.description);
                parent.published_at = unix_seconds(&snippet.published_at);
                parent.avatar_url = snippet.thumbnails.best();
                Some(SearchHit::Parent(parent))
            }
            "youtube#video" => {
                let mut child = ChildEntity::discovered(self.id.video_id?, snippet.channel_id?);
                child.title = non_empty(snippet.title);
                child.description = non_empty(snippet.description);
                child.published_at = unix_seconds(&snippet.published_at);
                child.thumbnail_url = snippet.thumbnails.best();
                Some(SearchHit::Child(child))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: Statistics,
    topic_details: Option<TopicDetails>,
    branding_settings: Option<BrandingSettings>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: Option<String>,
    description: Option<String>,
    custom_url: Option<String>,
    published_at: Option<String>,
    country: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicDetails {
    #[serde(default)]
    topic_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BrandingSettings {
    image: Option<BrandingImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrandingImage {
    banner_external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

impl From<ChannelItem> for ParentEntity {
    fn from(item: ChannelItem) -> Self {
        let snippet = item.snippet;
        let mut parent = ParentEntity::discovered(item.id);
        parent.email = snippet.description.as_deref().and_then(extract_email);
        parent.title = non_empty(snippet.title);
        parent.description = non_empty(snippet.description);
        parent.custom_url = non_empty(snippet.custom_url);
        parent.published_at = unix_seconds(&snippet.published_at);
        parent.country = non_empty(snippet.country);
        parent.avatar_url = snippet
            .thumbnails
            .default
            .map(|t| t.url)
            .or(snippet.thumbnails.high.map(|t| t.url));
        parent.subscriber_count = count(&item.statistics.subscriber_count);
        parent.video_count = count(&item.statistics.video_count);
        parent.view_count = count(&item.statistics.view_count);
        parent.topics = item.topic_details.map(|t| t.topic_ids);
        parent.banner_url = item
            .branding_settings
            .and_then(|b| b.image)
            .and_then(|i| i.banner_external_url);
        parent.collection_id = item
            .content_details
            .and_then(|c| c.related_playlists)
            .and_then(|p| p.uploads);
        parent
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: Statistics,
    content_details: Option<VideoContentDetails>,
    status: Option<VideoStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    channel_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    tags: Option<Vec<String>>,
    category_id: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus {
    privacy_status: Option<String>,
    made_for_kids: Option<bool>,
}

impl From<VideoItem> for ChildEntity {
    fn from(item: VideoItem) -> Self {
        let snippet = item.snippet;
        let mut child = ChildEntity::discovered(item.id, snippet.channel_id.unwrap_or_default());
        child.title = non_empty(snippet.title);
        child.description = non_empty(snippet.description);
        child.published_at = unix_seconds(&snippet.published_at);
        child.thumbnail_url = snippet.thumbnails.best();
        child.tags = snippet.tags;
        child.category_id = snippet.category_id;
        child.view_count = count(&item.statistics.view_count);
        child.like_count = count(&item.statistics.like_count);
        child.comment_count = count(&item.statistics.comment_count);
        child.duration = item.content_details.and_then(|c| c.duration);
        if let Some(status) = item.status {
            child.privacy_status = status.privacy_status;
            child.made_for_kids = status.made_for_kids;
        }
        child
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    #[serde(default)]
    snippet: PlaylistSnippet,
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    playlist_id: Option<String>,
    position: Option<i64>,
    title: Option<String>,
    published_at: Option<String>,
    channel_id: Option<String>,
    video_owner_channel_id: Option<String>,
    resource_id: Option<ResourceId>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    video_id: Option<String>,
    video_published_at: Option<String>,
}

impl PlaylistItem {
    fn into_child(self) -> Option<ChildEntity> {
        let snippet = self.snippet;
        let details = self.content_details;
        let video_id = details
            .as_ref()
            .and_then(|d| d.video_id.clone())
            .or_else(|| snippet.resource_id.and_then(|r| r.video_id))?;
        let owner = snippet
            .video_owner_channel_id
            .or(snippet.channel_id)
            .unwrap_or_default();

        let mut child = ChildEntity::discovered(video_id, owner);
        child.collection_id = snippet.playlist_id;
        child.position = snippet.position;
        child.title = non_empty(snippet.title);
        child.thumbnail_url = snippet.thumbnails.best();
        child.published_at = details
            .and_then(|d| unix_seconds(&d.video_published_at))
            .or_else(|| unix_seconds(&snippet.published_at));
        Some(child)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadItem {
    snippet: ThreadSnippet,
    replies: Option<ThreadReplies>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadSnippet {
    video_id: Option<String>,
    top_level_comment: CommentItem,
    total_reply_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ThreadReplies {
    #[serde(default)]
    comments: Vec<CommentItem>,
}

#[derive(Debug, Deserialize)]
struct CommentItem {
    id: String,
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    video_id: Option<String>,
    parent_id: Option<String>,
    author_display_name: Option<String>,
    author_channel_id: Option<AuthorChannel>,
    text_display: Option<String>,
    text_original: Option<String>,
    like_count: Option<i64>,
    published_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorChannel {
    value: Option<String>,
}

impl CommentItem {
    fn into_leaf(self, child_external_id: &str) -> LeafEntity {
        let snippet = self.snippet;
        let child = snippet
            .video_id
            .unwrap_or_else(|| child_external_id.to_string());
        let mut leaf = LeafEntity::new(self.id, child);
        leaf.parent_leaf_id = snippet.parent_id;
        leaf.author_name = snippet.author_display_name;
        leaf.author_channel_id = snippet.author_channel_id.and_then(|a| a.value);
        leaf.text = snippet.text_original.or(snippet.text_display);
        leaf.like_count = snippet.like_count;
        leaf.published_at = unix_seconds(&snippet.published_at);
        leaf.updated_at = unix_seconds(&snippet.updated_at);
        leaf
    }
}

impl ThreadItem {
    fn into_thread(self, child_external_id: &str) -> LeafThread {
        let child = self
            .snippet
            .video_id
            .unwrap_or_else(|| child_external_id.to_string());
        let mut top = self.snippet.top_level_comment.into_leaf(&child);
        top.reply_count = self.snippet.total_reply_count;
        let replies = self
            .replies
            .map(|r| r.comments)
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.into_leaf(&child))
            .collect();
        LeafThread { top, replies }
    }
}

fn cursor_param(query: &mut Vec<(&str, String)>, cursor: Option<&str>) {
    if let Some(token) = cursor {
        query.push(("pageToken", token.to_string()));
    }
}

impl SourceClient for YouTubeClient {
    fn search(
        &self,
        credential: &Credential,
        keyword: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> SourceResult<Page<SearchHit>> {
        let mut query = vec![
            ("part", "snippet".to_string()),
            ("type", "video,channel".to_string()),
            ("q", keyword.to_string()),
            ("maxResults", page_size.clamp(1, super::SEARCH_PAGE_SIZE).to_string()),
        ];
        cursor_param(&mut query, cursor);

        let response: ListResponse<SearchItem> =
            self.get(SourceOp::Search, "search", credential, &query)?;
        Ok(Page {
            items: response
                .items
                .into_iter()
                .filter_map(SearchItem::into_hit)
                .collect(),
            cost: SourceOp::Search.cost(),
            next_cursor: response.next_page_token,
        })
    }

    fn parent_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ParentEntity>> {
        let query = [
            (
                "part",
                "snippet,statistics,topicDetails,brandingSettings,contentDetails".to_string(),
            ),
            ("id", external_ids.join(",")),
            ("maxResults", external_ids.len().to_string()),
        ];
        let response: ListResponse<ChannelItem> =
            self.get(SourceOp::ParentDetails, "channels", credential, &query)?;
        Ok(Page::last(
            response.items.into_iter().map(ParentEntity::from).collect(),
            SourceOp::ParentDetails.cost(),
        ))
    }

    fn child_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ChildEntity>> {
        let query = [
            ("part", "snippet,statistics,contentDetails,status".to_string()),
            ("id", external_ids.join(",")),
            ("maxResults", external_ids.len().to_string()),
        ];
        let response: ListResponse<VideoItem> =
            self.get(SourceOp::ChildDetails, "videos", credential, &query)?;
        Ok(Page::last(
            response.items.into_iter().map(ChildEntity::from).collect(),
            SourceOp::ChildDetails.cost(),
        ))
    }

    fn expand_page(
        &self,
        credential: &Credential,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<ChildEntity>> {
        let mut query = vec![
            ("part", "snippet,contentDetails".to_string()),
            ("playlistId", collection_id.to_string()),
            ("maxResults", EXPAND_PAGE_SIZE.to_string()),
        ];
        cursor_param(&mut query, cursor);

        let response: ListResponse<PlaylistItem> =
            self.get(SourceOp::ExpandPage, "playlistItems", credential, &query)?;
        Ok(Page {
            items: response
                .items
                .into_iter()
                .filter_map(PlaylistItem::into_child)
                .collect(),
            cost: SourceOp::ExpandPage.cost(),
            next_cursor: response.next_page_token,
        })
    }

    fn leaf_page(
        &self,
        credential: &Credential,
        child_external_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafThread>> {
        let mut query = vec![
            ("part", "snippet,replies".to_string()),
            ("videoId", child_external_id.to_string()),
            ("maxResults", LEAF_PAGE_SIZE.to_string()),
            ("textFormat", "plainText".to_string()),
        ];
        cursor_param(&mut query, cursor);

        let response: ListResponse<ThreadItem> =
            self.get(SourceOp::LeafPage, "commentThreads", credential, &query)?;
        Ok(Page {
            items: response
                .items
                .into_iter()
                .map(|item| item.into_thread(child_external_id))
                .collect(),
            cost: SourceOp::LeafPage.cost(),
            next_cursor: response.next_page_token,
        })
    }

    fn sub_leaf_page(
        &self,
        credential: &Credential,
        parent_leaf_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafEntity>> {
        let mut query = vec![
            ("part", "snippet".to_string()),
            ("parentId", parent_leaf_id.to_string()),
            ("maxResults", LEAF_PAGE_SIZE.to_string()),
            ("textFormat", "plainText".to_string()),
        ];
        cursor_param(&mut query, cursor);

        let response: ListResponse<CommentItem> =
            self.get(SourceOp::SubLeafPage, "comments", credential, &query)?;
        Ok(Page {
            items: response
                .items
                .into_iter()
                // Replies do not carry the video id; the stage fills it in
                .map(|item| item.into_leaf(""))
                .collect(),
            cost: SourceOp::SubLeafPage.cost(),
            next_cursor: response.next_page_token,
        })
    }

    fn resolve_parent(
        &self,
        credential: &Credential,
        alternate_key: &str,
    ) -> SourceResult<Page<String>> {
        let key = alternate_key.trim();
        if key.is_empty() {
            return Err(SourceError::Malformed("empty alternate key".to_string()));
        }

        let mut cost = SourceOp::ResolveParent.cost();
        let direct = if key.starts_with('@') {
            self.resolve_by(credential, "forHandle", key)?
        } else {
            self.resolve_by(credential, "forUsername", key)?
        };
        if let Some(id) = direct {
            return Ok(Page::last(vec![id], cost));
        }

        // Custom names have no lookup endpoint; fall back to a channel search
        let query = [
            ("part", "snippet".to_string()),
            ("type", "channel".to_string()),
            ("q", key.trim_start_matches('@').to_string()),
            ("maxResults", "1".to_string()),
        ];
        let response: ListResponse<SearchItem> =
            self.get(SourceOp::Search, "search", credential, &query)?;
        cost += SourceOp::Search.cost();

        match response.items.into_iter().find_map(SearchItem::into_hit) {
            Some(SearchHit::Parent(parent)) => Ok(Page::last(vec![parent.external_id], cost)),
            _ => Err(SourceError::NotFound(format!("no channel for {}", key))),
        }
    }
}
