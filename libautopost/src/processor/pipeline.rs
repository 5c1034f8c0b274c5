//! Per-item pipeline: detail fetch, generation, link augmentation, publish
//!
//! Collaborator failures become an [`ItemOutcome::Failed`] for the item.
//! Only state-store failures propagate as errors, since they abort the run.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::collaborators::{CollabResult, Collaborators, GeneratedContent, PublishRequest};
use crate::config::ProcessorConfig;
use crate::error::{CollaboratorError, Result};
use crate::rotation::AuthorRotator;
use crate::scheduling::ScheduleEngine;
use crate::types::{Item, ItemError, PipelineStep, Profile, PublishMode, PublishResult, Run};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ItemOutcome {
    /// At least one profile accepted the item
    Published(Vec<PublishResult>),
    Failed(ItemError),
}

pub(crate) struct ItemPipeline {
    collaborators: Collaborators,
    engine: Arc<ScheduleEngine>,
    rotator: AuthorRotator,
    publish_attempts: u32,
    retry_backoff: Duration,
}

impl ItemPipeline {
    pub(crate) fn new(
        collaborators: Collaborators,
        engine: Arc<ScheduleEngine>,
        rotator: AuthorRotator,
        settings: &ProcessorConfig,
    ) -> Self {
        Self {
            collaborators,
            engine,
            rotator,
            publish_attempts: settings.publish_attempts.max(1),
            retry_backoff: settings.retry_backoff,
        }
    }

    pub(crate) async fn process_item(&self, run: &Run, item: &Item) -> Result<ItemOutcome> {
        let details = match self
            .collaborators
            .details
            .fetch_details(&item.url, &run.content_type)
            .await
        {
            Ok(details) => details,
            Err(e) => return Ok(failed(item, PipelineStep::DetailFetching, &e)),
        };

        let content = match self
            .collaborators
            .generator
            .generate(item, &details, &run.config)
            .await
        {
            Ok(content) if content.is_empty() => {
                return Ok(failed(
                    item,
                    PipelineStep::ArticleGeneration,
                    &CollaboratorError::EmptyContent,
                ))
            }
            Ok(content) => content,
            Err(e) => return Ok(failed(item, PipelineStep::ArticleGeneration, &e)),
        };

        let profiles: Vec<Profile> = run.target_profiles().into_iter().cloned().collect();
        let html = self.augment_links(run, item, &content, &profiles).await;
        let title = if content.title.trim().is_empty() {
            item.title.clone()
        } else {
            content.title.clone()
        };

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for profile in &profiles {
            match self
                .publish_to_profile(run, item, &title, &content.slug, &html, profile)
                .await?
            {
                Ok(result) => results.push(result),
                Err(message) => failures.push(format!("{}: {}", profile.id, message)),
            }
        }

        if results.is_empty() {
            return Ok(ItemOutcome::Failed(ItemError::new(
                item,
                PipelineStep::Publishing,
                failures.join("; "),
            )));
        }
        Ok(ItemOutcome::Published(results))
    }

    /// Failures here keep the unmodified html
    async fn augment_links(
        &self,
        run: &Run,
        item: &Item,
        content: &GeneratedContent,
        profiles: &[Profile],
    ) -> String {
        let Some(linker) = self.collaborators.linker.as_ref().filter(|_| run.config.add_links)
        else {
            return content.html.clone();
        };

        match linker
            .augment(&content.html, &content.title, profiles, &run.config)
            .await
        {
            Ok(html) if !html.trim().is_empty() => html,
            Ok(_) => {
                warn!(run_id = %run.id, item_id = %item.id, "Link augmentation returned nothing");
                content.html.clone()
            }
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    item_id = %item.id,
                    error = %e,
                    "Link augmentation failed, publishing without links"
                );
                content.html.clone()
            }
        }
    }

    async fn render_image(&self, run: &Run, title: &str, profile: &Profile) -> Option<PathBuf> {
        if !run.config.generate_images {
            return None;
        }
        let renderer = self.collaborators.images.as_ref()?;

        match renderer
            .render_feature_image(title, &run.content_type, &profile.name)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    profile_id = %profile.id,
                    error = %e,
                    "Feature image rendering failed, publishing without image"
                );
                None
            }
        }
    }

    /// Publish one item to one profile.
    ///
    /// The inner error is the failure message for this profile; the outer
    /// error is a state-store failure.
    async fn publish_to_profile(
        &self,
        run: &Run,
        item: &Item,
        title: &str,
        slug: &str,
        html: &str,
        profile: &Profile,
    ) -> Result<std::result::Result<PublishResult, String>> {
        let schedule_time: Option<DateTime<Utc>> = (profile.mode == PublishMode::Scheduled)
            .then(|| self.engine.next_time(&run.id, profile));
        let author = self.rotator.select(&run.user_id, profile).await?;
        let image_path = self.render_image(run, title, profile).await;

        let request = PublishRequest {
            profile_id: profile.id.clone(),
            title: title.to_string(),
            slug: slug.to_string(),
            html: html.to_string(),
            status: profile.mode.as_publish_status().to_string(),
            schedule_time,
            author: author.as_ref().map(|a| a.author.clone()),
            image_path,
        };

        let url = match self.publish_with_retry(&request).await {
            Ok(url) if !url.trim().is_empty() => url,
            Ok(_) => {
                warn!(
                    run_id = %run.id,
                    item_id = %item.id,
                    profile_id = %profile.id,
                    "Publisher returned no url"
                );
                return Ok(Err("publisher returned no url".to_string()));
            }
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    item_id = %item.id,
                    profile_id = %profile.id,
                    error = %e,
                    "Publish failed"
                );
                return Ok(Err(e.to_string()));
            }
        };

        if let Some(selection) = &author {
            self.rotator.commit(&run.user_id, profile, selection).await?;
        }
        if schedule_time.is_some() {
            let next = self.engine.advance(&run.id, profile);
            debug!(run_id = %run.id, profile_id = %profile.id, next = %next, "Schedule advanced");
        }

        info!(
            run_id = %run.id,
            item_id = %item.id,
            profile_id = %profile.id,
            url = %url,
            "Published item"
        );

        Ok(Ok(PublishResult {
            item_id: item.id.clone(),
            item_title: item.title.clone(),
            url,
            profile_id: profile.id.clone(),
            published_at: Utc::now(),
            author: request.author,
            scheduled_for: schedule_time,
        }))
    }

    /// Publish with exponential backoff on transient errors
    async fn publish_with_retry(&self, request: &PublishRequest) -> CollabResult<String> {
        let max_attempts = self.publish_attempts;

        for attempt in 1..=max_attempts {
            match self.collaborators.publisher.publish(request).await {
                Ok(url) => {
                    if attempt > 1 {
                        info!(
                            profile_id = %request.profile_id,
                            attempt,
                            "Publish succeeded after retry"
                        );
                    }
                    return Ok(url);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry_backoff * 2_u32.pow(attempt - 1);
                    warn!(
                        profile_id = %request.profile_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transient publish error, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(CollaboratorError::Publish(format!(
            "Failed to publish to {} after {} attempts",
            request.profile_id, max_attempts
        )))
    }
}

fn failed(item: &Item, step: PipelineStep, error: &CollaboratorError) -> ItemOutcome {
    ItemOutcome::Failed(ItemError::new(item, step, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::{
        MockDetails, MockGenerator, MockImageRenderer, MockLinker, MockPublisher,
    };
    use crate::store::memory::MemoryRepository;
    use crate::store::StateStore;
    use crate::types::RunConfig;

    struct Fixture {
        pipeline: ItemPipeline,
        publisher: Arc<MockPublisher>,
        store: StateStore,
    }

    fn settings() -> ProcessorConfig {
        ProcessorConfig {
            retry_backoff: Duration::from_millis(1),
            ..ProcessorConfig::default()
        }
    }

    fn fixture(collaborators: Collaborators, publisher: Arc<MockPublisher>) -> Fixture {
        let store = StateStore::new(Arc::new(MemoryRepository::new()));
        let pipeline = ItemPipeline::new(
            collaborators,
            Arc::new(ScheduleEngine::new()),
            AuthorRotator::new(store.clone()),
            &settings(),
        );
        Fixture {
            pipeline,
            publisher,
            store,
        }
    }

    fn basic(publisher: MockPublisher) -> Fixture {
        let publisher = Arc::new(publisher);
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        );
        fixture(collaborators, publisher)
    }

    fn run(profiles: Vec<Profile>) -> Run {
        let ids = profiles.iter().map(|p| p.id.clone()).collect();
        Run::new(
            "user-1".to_string(),
            "job".to_string(),
            vec![Item::new("1", "Rust Engineer", "https://jobs.example/1")],
            ids,
            RunConfig::new(profiles),
        )
    }

    #[tokio::test]
    async fn test_publishes_to_every_profile() {
        let f = basic(MockPublisher::new());
        let run = run(vec![Profile::new("a", "A"), Profile::new("b", "B")]);

        let outcome = f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        let ItemOutcome::Published(results) = outcome else {
            panic!("Expected publish results");
        };
        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/rust-engineer", "https://b.example/rust-engineer"]
        );
        assert_eq!(f.publisher.requests()[0].status, "publish");
    }

    #[tokio::test]
    async fn test_partial_profile_failure_still_succeeds() {
        let f = basic(MockPublisher::new().failing_for_profile("a"));
        let run = run(vec![Profile::new("a", "A"), Profile::new("b", "B")]);

        match f.pipeline.process_item(&run, &run.items[0]).await.unwrap() {
            ItemOutcome::Published(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].profile_id, "b");
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_url_counts_as_failure() {
        let f = basic(MockPublisher::new().empty_url_for_profile("a"));
        let run = run(vec![Profile::new("a", "A")]);

        match f.pipeline.process_item(&run, &run.items[0]).await.unwrap() {
            ItemOutcome::Failed(error) => {
                assert_eq!(error.step, PipelineStep::Publishing);
                assert!(error.message.contains("no url"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_generation_is_generation_error() {
        let publisher = Arc::new(MockPublisher::new());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new().empty_for("1")),
            publisher.clone(),
        );
        let f = fixture(collaborators, publisher);
        let run = run(vec![Profile::new("a", "A")]);

        match f.pipeline.process_item(&run, &run.items[0]).await.unwrap() {
            ItemOutcome::Failed(error) => assert_eq!(error.step, PipelineStep::ArticleGeneration),
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(f.publisher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_detail_input_is_detail_error() {
        let publisher = Arc::new(MockPublisher::new());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new().rejecting("https://jobs.example/1")),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        );
        let f = fixture(collaborators, publisher);
        let run = run(vec![Profile::new("a", "A")]);

        match f.pipeline.process_item(&run, &run.items[0]).await.unwrap() {
            ItemOutcome::Failed(error) => {
                assert_eq!(error.step, PipelineStep::DetailFetching);
                assert!(error.message.starts_with("Bad input"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_failure_is_swallowed() {
        let publisher = Arc::new(MockPublisher::new());
        let linker = Arc::new(MockLinker::failing());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        )
        .with_linker(linker.clone());
        let f = fixture(collaborators, publisher);
        let run = run(vec![Profile::new("a", "A")]);

        let outcome = f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Published(_)));
        assert_eq!(linker.call_count(), 1);
        assert!(!f.publisher.requests()[0].html.contains("linked"));
    }

    #[tokio::test]
    async fn test_links_respect_run_config() {
        let publisher = Arc::new(MockPublisher::new());
        let linker = Arc::new(MockLinker::new());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        )
        .with_linker(linker.clone());
        let f = fixture(collaborators, publisher);

        let mut run = run(vec![Profile::new("a", "A")]);
        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert!(f.publisher.requests()[0].html.ends_with("<!-- linked:1 -->"));

        run.config.add_links = false;
        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert_eq!(linker.call_count(), 1);
    }

    #[tokio::test]
    async fn test_images_rendered_per_profile_and_optional() {
        let publisher = Arc::new(MockPublisher::new());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        )
        .with_image_renderer(Arc::new(MockImageRenderer::new()));
        let f = fixture(collaborators, publisher);

        let mut run = run(vec![Profile::new("a", "Site A"), Profile::new("b", "Site B")]);
        run.config.generate_images = true;
        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();

        let paths: Vec<PathBuf> = f
            .publisher
            .requests()
            .into_iter()
            .filter_map(|r| r.image_path)
            .collect();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].to_string_lossy().contains("site-a"));
        assert!(paths[1].to_string_lossy().contains("site-b"));
    }

    #[tokio::test]
    async fn test_image_failure_omits_image() {
        let publisher = Arc::new(MockPublisher::new());
        let collaborators = Collaborators::new(
            Arc::new(MockDetails::new()),
            Arc::new(MockGenerator::new()),
            publisher.clone(),
        )
        .with_image_renderer(Arc::new(MockImageRenderer::failing()));
        let f = fixture(collaborators, publisher);

        let mut run = run(vec![Profile::new("a", "A")]);
        run.config.generate_images = true;
        let outcome = f.pipeline.process_item(&run, &run.items[0]).await.unwrap();

        assert!(matches!(outcome, ItemOutcome::Published(_)));
        assert_eq!(f.publisher.requests()[0].image_path, None);
    }

    #[tokio::test]
    async fn test_transient_publish_errors_are_retried() {
        let f = basic(MockPublisher::new().with_transient_failures(2));
        let run = run(vec![Profile::new("a", "A")]);

        let outcome = f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Published(_)));
        assert_eq!(f.publisher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let f = basic(MockPublisher::new().with_transient_failures(5));
        let run = run(vec![Profile::new("a", "A")]);

        let outcome = f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Failed(_)));
        assert_eq!(f.publisher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_publish_errors_are_not_retried() {
        let f = basic(MockPublisher::new().failing_for_profile("a"));
        let run = run(vec![Profile::new("a", "A")]);

        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        assert_eq!(f.publisher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_author_and_schedule() {
        let f = basic(MockPublisher::new().failing_for_title("Rust Engineer"));
        let profile = Profile::new("a", "A")
            .scheduled(10, 10)
            .with_authors(["ana", "ben"]);
        let run = run(vec![profile]);

        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();
        f.pipeline.process_item(&run, &run.items[0]).await.unwrap();

        let requests = f.publisher.requests();
        assert_eq!(requests[0].author.as_deref(), Some("ana"));
        assert_eq!(requests[1].author.as_deref(), Some("ana"));
        assert_eq!(requests[0].schedule_time, requests[1].schedule_time);
        assert_eq!(requests[0].status, "future");
        assert_eq!(f.store.get_last_author_index("user-1", "a").await.unwrap(), -1);
    }
}
