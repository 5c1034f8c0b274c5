//! Scriptable collaborators for testing
//!
//! Each mock records the calls it receives and can be told to fail for
//! specific items or profiles, so tests can exercise per-item failure
//! isolation without network access.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::collaborators::{
    CollabResult, ContentGenerator, DetailFetcher, DetailPayload, GeneratedContent, ImageRenderer,
    LinkAugmenter, PublishRequest, Publisher,
};
use crate::error::CollaboratorError;
use crate::types::{Item, Profile, RunConfig};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slug the mock generator derives from a title
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Detail fetcher that fails for configured urls
#[derive(Default)]
pub struct MockDetails {
    failing_urls: HashSet<String>,
    bad_input_urls: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with an upstream error for this url
    pub fn failing_for(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    /// Fail with a bad-input error for this url
    pub fn rejecting(mut self, url: &str) -> Self {
        self.bad_input_urls.insert(url.to_string());
        self
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl DetailFetcher for MockDetails {
    async fn fetch_details(&self, url: &str, content_type: &str) -> CollabResult<DetailPayload> {
        lock(&self.calls).push(url.to_string());

        if self.bad_input_urls.contains(url) {
            return Err(CollaboratorError::BadInput(format!("unsupported url {}", url)));
        }
        if self.failing_urls.contains(url) {
            return Err(CollaboratorError::Upstream(format!("listing API returned 503 for {}", url)));
        }

        Ok(serde_json::json!({
            "url": url,
            "content_type": content_type,
            "description": format!("Details for {}", url),
        }))
    }
}

/// Generator that produces a small article per item
#[derive(Default)]
pub struct MockGenerator {
    failing_items: HashSet<String>,
    empty_items: HashSet<String>,
    fail_all: bool,
    calls: Arc<AtomicUsize>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, item_id: &str) -> Self {
        self.failing_items.insert(item_id.to_string());
        self
    }

    /// Return empty content (without an error) for this item
    pub fn empty_for(mut self, item_id: &str) -> Self {
        self.empty_items.insert(item_id.to_string());
        self
    }

    pub fn failing_always() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(
        &self,
        item: &Item,
        details: &DetailPayload,
        _config: &RunConfig,
    ) -> CollabResult<GeneratedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all || self.failing_items.contains(&item.id) {
            return Err(CollaboratorError::Upstream("generation model unavailable".to_string()));
        }
        if self.empty_items.contains(&item.id) {
            return Ok(GeneratedContent::default());
        }

        let description = details["description"].as_str().unwrap_or_default();
        Ok(GeneratedContent {
            title: item.title.clone(),
            html: format!("<h1>{}</h1><p>{}</p>", item.title, description),
            slug: slugify(&item.title),
            metadata: serde_json::json!({ "source": item.url }),
        })
    }
}

/// Link augmenter that appends a marker, or fails when told to
#[derive(Default)]
pub struct MockLinker {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkAugmenter for MockLinker {
    async fn augment(
        &self,
        html: &str,
        _title: &str,
        profiles: &[Profile],
        _config: &RunConfig,
    ) -> CollabResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollaboratorError::Upstream("link index unavailable".to_string()));
        }
        Ok(format!("{}<!-- linked:{} -->", html, profiles.len()))
    }
}

/// Image renderer returning a fake path per site
#[derive(Default)]
pub struct MockImageRenderer {
    fail: bool,
}

impl MockImageRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl ImageRenderer for MockImageRenderer {
    async fn render_feature_image(
        &self,
        title: &str,
        content_type: &str,
        site_label: &str,
    ) -> CollabResult<PathBuf> {
        if self.fail {
            return Err(CollaboratorError::Render("font not found".to_string()));
        }
        Ok(PathBuf::from(format!(
            "/tmp/autopost/{}-{}-{}.png",
            content_type,
            slugify(site_label),
            slugify(title)
        )))
    }
}

/// Publisher that records every request
#[derive(Default)]
pub struct MockPublisher {
    failing_profiles: HashSet<String>,
    failing_titles: HashSet<String>,
    empty_url_profiles: HashSet<String>,
    transient_failures: AtomicUsize,
    delay: Duration,
    requests: Arc<Mutex<Vec<PublishRequest>>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish to this profile
    pub fn failing_for_profile(mut self, profile_id: &str) -> Self {
        self.failing_profiles.insert(profile_id.to_string());
        self
    }

    /// Reject every publish of an article with this title
    pub fn failing_for_title(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    /// Return an empty url (no error) for this profile
    pub fn empty_url_for_profile(mut self, profile_id: &str) -> Self {
        self.empty_url_profiles.insert(profile_id.to_string());
        self
    }

    /// Fail the first `count` calls with a network error
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Simulate a slow destination
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, request: &PublishRequest) -> CollabResult<String> {
        lock(&self.requests).push(request.clone());

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Network("connection reset".to_string()));
        }

        if self.failing_profiles.contains(&request.profile_id)
            || self.failing_titles.contains(&request.title)
        {
            return Err(CollaboratorError::Publish(format!(
                "{} rejected the post",
                request.profile_id
            )));
        }
        if self.empty_url_profiles.contains(&request.profile_id) {
            return Ok(String::new());
        }

        Ok(format!("https://{}.example/{}", request.profile_id, request.slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(profile_id: &str, title: &str) -> PublishRequest {
        PublishRequest {
            profile_id: profile_id.to_string(),
            title: title.to_string(),
            slug: slugify(title),
            html: "<p>x</p>".to_string(),
            status: "publish".to_string(),
            schedule_time: None,
            author: None,
            image_path: None,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Senior Rust Engineer (Remote)"), "senior-rust-engineer-remote");
        assert_eq!(slugify("  "), "");
    }

    #[tokio::test]
    async fn test_mock_details_error_kinds() {
        let details = MockDetails::new()
            .failing_for("https://a")
            .rejecting("https://b");

        assert!(matches!(
            details.fetch_details("https://a", "job").await,
            Err(CollaboratorError::Upstream(_))
        ));
        assert!(matches!(
            details.fetch_details("https://b", "job").await,
            Err(CollaboratorError::BadInput(_))
        ));
        assert!(details.fetch_details("https://c", "job").await.is_ok());
        assert_eq!(details.fetched_urls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_publisher_transient_then_success() {
        let publisher = MockPublisher::new().with_transient_failures(1);
        let req = request("blog", "Hello World");

        let first = publisher.publish(&req).await;
        assert!(matches!(first, Err(ref e) if e.is_transient()));

        let second = publisher.publish(&req).await.unwrap();
        assert_eq!(second, "https://blog.example/hello-world");
        assert_eq!(publisher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_publisher_failures() {
        let publisher = MockPublisher::new()
            .failing_for_profile("down")
            .failing_for_title("Bad")
            .empty_url_for_profile("silent");

        assert!(publisher.publish(&request("down", "Ok")).await.is_err());
        assert!(publisher.publish(&request("blog", "Bad")).await.is_err());
        assert_eq!(publisher.publish(&request("silent", "Ok")).await.unwrap(), "");
    }
}
