use newsletter::llm_adapter::{LlmError, ScriptedLlmClient};
use newsletter::processing::{
    run_item, transition, AttemptOutcome, FilterStage, ItemState, RetryPolicy, SummarizationStage,
};
use newsletter::types::{Content, ForumContent, NewsletterError, Post, PostList};
use newsletter::{PipelineConfig, Summarizer, WorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const RELEVANT: &str = "Thinking it over... <answer>Relevant</answer>";
const NOT_RELEVANT: &str = "<answer>Not relevant</answer>";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn fast_policy(num_retries: u32) -> RetryPolicy {
    RetryPolicy {
        num_retries,
        rate_limit_backoff: Duration::ZERO,
        unavailable_backoff: Duration::ZERO,
    }
}

fn config(workers: usize, num_retries: u32) -> PipelineConfig {
    PipelineConfig {
        workers,
        retry: fast_policy(num_retries),
    }
}

fn sample_post(index: usize) -> Post {
    Post {
        title: Some(format!("Post number {}", index)),
        content: Some(ForumContent::from(vec![Content::text(format!("Body of post {}", index))])),
        upvotes: Some(100 + index as i64),
        downvotes: Some(5),
        author: Some(format!("user{}", index)),
        created_utc: Some(1_717_000_000),
        permalink: Some(format!("https://www.reddit.com/r/rust/comments/p{}/", index)),
        comments: Vec::new(),
    }
}

fn sample_list(count: usize) -> PostList {
    PostList::new("reddit", (0..count).map(sample_post).collect())
}

fn models(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Summary echoing the post title so results can be told apart.
fn summary_for(prompt: &str) -> Result<String, LlmError> {
    let title = prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix("\"title\": \""))
        .map(|rest| rest.trim_end_matches(',').trim_end_matches('"').to_string())
        .unwrap_or_default();
    Ok(format!("<title>{}</title>\n<body>What people said about {}.</body>", title, title))
}

fn summarizer(llm: Arc<ScriptedLlmClient>, workers: usize, num_retries: u32) -> Summarizer {
    Summarizer::new(llm, config(workers, num_retries), "/tmp/newsletters")
}

#[test]
fn transition_follows_the_retry_protocol() {
    let policy = RetryPolicy::with_retries(2);

    assert_eq!(
        transition(0, 1, AttemptOutcome::Extracted(7), 2, &policy),
        ItemState::Accepted(7)
    );
    assert_eq!(
        transition::<()>(0, 1, AttemptOutcome::Malformed, 2, &policy),
        ItemState::Retrying {
            model_index: 0,
            attempts_made: 1,
            wait: Duration::ZERO
        }
    );
    assert_eq!(
        transition::<()>(0, 1, AttemptOutcome::RateLimited, 2, &policy),
        ItemState::Retrying {
            model_index: 0,
            attempts_made: 1,
            wait: Duration::from_secs(15)
        }
    );
    assert_eq!(
        transition::<()>(0, 2, AttemptOutcome::Unavailable, 2, &policy),
        ItemState::Retrying {
            model_index: 1,
            attempts_made: 2,
            wait: Duration::from_secs(3)
        }
    );
}

#[test]
fn model_index_is_clamped_to_the_last_candidate() {
    let policy = RetryPolicy::with_retries(5);
    let state = transition::<()>(1, 1, AttemptOutcome::Unavailable, 2, &policy);
    assert!(matches!(state, ItemState::Retrying { model_index: 1, .. }));

    let single = transition::<()>(0, 1, AttemptOutcome::Unavailable, 1, &policy);
    assert!(matches!(single, ItemState::Retrying { model_index: 0, .. }));
}

#[test]
fn exhausted_budget_fails_without_waiting() {
    let policy = RetryPolicy::with_retries(1);
    assert_eq!(
        transition::<()>(0, 2, AttemptOutcome::RateLimited, 1, &policy),
        ItemState::Failed {
            attempts: 2,
            model_index: 0
        }
    );
}

#[tokio::test]
async fn malformed_output_fails_after_exactly_the_budget() {
    init_tracing();

    for num_retries in [0, 1, 3] {
        let llm = ScriptedLlmClient::new("garbage").always("m", Ok("I am not sure.".to_string()));
        let state = run_item(
            &llm,
            &FilterStage::new("rust"),
            &sample_post(0),
            &models(&["m"]),
            &fast_policy(num_retries),
            &WorkerPool::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        info!("num_retries={} ended in {:?}", num_retries, state);
        assert_eq!(
            state,
            ItemState::Failed {
                attempts: num_retries + 1,
                model_index: 0
            }
        );
        assert_eq!(llm.calls_for("m"), num_retries as usize + 1);
    }
}

#[tokio::test]
async fn unavailable_model_fails_over_and_never_goes_back() {
    init_tracing();

    let llm = ScriptedLlmClient::new("failover")
        .always("a", Err(LlmError::ServiceUnavailable("down".to_string())))
        .script(
            "b",
            vec![
                Err(LlmError::ServiceUnavailable("busy".to_string())),
                Ok(RELEVANT.to_string()),
            ],
        );

    let state = run_item(
        &llm,
        &FilterStage::new("rust"),
        &sample_post(0),
        &models(&["a", "b"]),
        &fast_policy(3),
        &WorkerPool::new(1),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(state, ItemState::Accepted(true));
    let sequence: Vec<String> = llm.calls().into_iter().map(|call| call.model).collect();
    assert_eq!(sequence, vec!["a", "b", "b"]);
}

#[tokio::test]
async fn every_item_reaches_the_fallback_model() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("failover")
            .always("a", Err(LlmError::ServiceUnavailable("down".to_string())))
            .always("b", Ok(RELEVANT.to_string()))
            .respond_with("writer", summary_for),
    );

    let newsletter = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(
            &sample_list(5),
            &models(&["a", "b"]),
            &models(&["writer"]),
            Some("Rust programming"),
            Some("failover".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(newsletter.len(), 5);
    assert_eq!(llm.calls_for("a"), 5);
    assert_eq!(llm.calls_for("b"), 5);
    assert_eq!(llm.calls_for("writer"), 5);
}

#[tokio::test]
async fn news_follow_input_order_and_cite_the_permalink() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("ordered")
            .with_delay(5)
            .always("judge", Ok(RELEVANT.to_string()))
            .respond_with("writer", summary_for),
    );

    let newsletter = summarizer(llm, 3, 1)
        .summarize_post_list(
            &sample_list(6),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Rust"),
            Some("ordered".to_string()),
        )
        .await
        .unwrap();

    let titles: Vec<&str> = newsletter.news.iter().map(|news| news.title.as_str()).collect();
    let expected: Vec<String> = (0..6).map(|i| format!("Post number {}", i)).collect();
    assert_eq!(titles, expected);
    assert_eq!(
        newsletter.news[2].sources,
        vec!["https://www.reddit.com/r/rust/comments/p2/".to_string()]
    );
    assert_eq!(newsletter.name, "ordered");
    assert!(newsletter.storage_path.ends_with("ordered.json"));
}

#[tokio::test]
async fn irrelevant_posts_are_not_summarized() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("picky")
            .respond_with("judge", |prompt| {
                if prompt.contains("Post number 1") {
                    Ok(RELEVANT.to_string())
                } else {
                    Ok(NOT_RELEVANT.to_string())
                }
            })
            .respond_with("writer", summary_for),
    );

    let newsletter = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(
            &sample_list(3),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Only post one"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(newsletter.len(), 1);
    assert_eq!(newsletter.news[0].title, "Post number 1");
    assert_eq!(llm.calls_for("writer"), 1);
    assert!(!newsletter.name.is_empty());
}

#[tokio::test]
async fn without_interest_profile_every_post_is_accepted() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("no-profile")
            .always("judge", Ok(NOT_RELEVANT.to_string()))
            .respond_with("writer", summary_for),
    );

    let newsletter = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(&sample_list(4), &models(&["judge"]), &models(&["writer"]), None, None)
        .await
        .unwrap();

    assert_eq!(newsletter.len(), 4);
    assert_eq!(llm.calls_for("judge"), 0);

    let blank = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(&sample_list(2), &models(&["judge"]), &models(&["writer"]), Some("  \n"), None)
        .await
        .unwrap();
    assert_eq!(blank.len(), 2);
    assert_eq!(llm.calls_for("judge"), 0);
}

#[tokio::test]
async fn authentication_failure_aborts_the_run() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("bad-key")
            .always("judge", Err(LlmError::Authentication("invalid api key".to_string())))
            .respond_with("writer", summary_for),
    );

    let result = summarizer(llm.clone(), 1, 3)
        .summarize_post_list(
            &sample_list(5),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Rust"),
            None,
        )
        .await;

    let error = result.unwrap_err();
    assert!(error.is_fatal(), "unexpected error: {}", error);
    assert_eq!(llm.calls_for("judge"), 1);
    assert_eq!(llm.calls_for("writer"), 0);
}

#[tokio::test]
async fn failed_summaries_leave_a_short_newsletter() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("flaky-writer")
            .always("judge", Ok(RELEVANT.to_string()))
            .respond_with("writer", |prompt| {
                if prompt.contains("Post number 0") {
                    Ok("<title>Missing its body</title>".to_string())
                } else if prompt.contains("Post number 1") {
                    Err(LlmError::Api {
                        status: 400,
                        body: "context length exceeded".to_string(),
                    })
                } else {
                    summary_for(prompt)
                }
            }),
    );

    let newsletter = summarizer(llm.clone(), 2, 1)
        .summarize_post_list(
            &sample_list(4),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Rust"),
            None,
        )
        .await
        .unwrap();

    let titles: Vec<&str> = newsletter.news.iter().map(|news| news.title.as_str()).collect();
    assert_eq!(titles, vec!["Post number 2", "Post number 3"]);
    // two malformed attempts for post 0, one failed call for post 1, one each for the rest
    assert_eq!(llm.calls_for("writer"), 5);
}

#[tokio::test]
async fn identical_runs_produce_identical_news() {
    init_tracing();

    let llm = Arc::new(
        ScriptedLlmClient::new("deterministic")
            .with_delay(2)
            .always("judge", Ok(RELEVANT.to_string()))
            .respond_with("writer", summary_for),
    );
    let summarizer = summarizer(llm, 4, 1);
    let posts = sample_list(8);

    let first = summarizer
        .summarize_post_list(&posts, &models(&["judge"]), &models(&["writer"]), Some("Rust"), None)
        .await
        .unwrap();
    let second = summarizer
        .summarize_post_list(&posts, &models(&["judge"]), &models(&["writer"]), Some("Rust"), None)
        .await
        .unwrap();

    assert_eq!(first.news, second.news);
    assert_eq!(first.len(), 8);
}

#[tokio::test]
async fn empty_model_list_is_rejected() {
    let llm = Arc::new(ScriptedLlmClient::new("unused"));
    let result = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(&sample_list(2), &[], &models(&["writer"]), Some("Rust"), None)
        .await;

    assert!(result.is_err());
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn empty_post_list_gives_an_empty_newsletter() {
    let llm = Arc::new(ScriptedLlmClient::new("idle"));
    let newsletter = summarizer(llm.clone(), 4, 1)
        .summarize_post_list(
            &PostList::empty("reddit"),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Rust"),
            Some("quiet-day".to_string()),
        )
        .await
        .unwrap();

    assert!(newsletter.is_empty());
    assert!(llm.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_fifteen_seconds_on_the_same_model() {
    init_tracing();

    let llm = ScriptedLlmClient::new("throttled").script(
        "judge",
        vec![
            Err(LlmError::RateLimit("slow down".to_string())),
            Ok(RELEVANT.to_string()),
        ],
    );
    let summarizer = Summarizer::new(
        Arc::new(llm),
        PipelineConfig {
            workers: 1,
            retry: RetryPolicy::default(),
        },
        "/tmp/newsletters",
    );

    let started = tokio::time::Instant::now();
    let verdict = summarizer
        .filter_post(&sample_post(0), &models(&["judge", "spare"]), Some("Rust"))
        .await
        .unwrap();

    assert_eq!(verdict, Some(true));
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test]
async fn newsletter_name_cannot_leave_the_folder() {
    let llm = Arc::new(
        ScriptedLlmClient::new("escape")
            .always("judge", Ok(RELEVANT.to_string()))
            .respond_with("writer", summary_for),
    );

    let result = summarizer(llm.clone(), 2, 1)
        .summarize_post_list(
            &sample_list(2),
            &models(&["judge"]),
            &models(&["writer"]),
            Some("Rust"),
            Some("../outside".to_string()),
        )
        .await;

    assert!(matches!(result, Err(NewsletterError::InvalidName(_))));
    assert!(llm.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backing_off_item_frees_its_worker_slot() {
    init_tracing();

    let started = tokio::time::Instant::now();
    let throttled_once = Arc::new(AtomicBool::new(false));
    let call_times = Arc::new(Mutex::new(Vec::new()));

    let llm = {
        let throttled_once = Arc::clone(&throttled_once);
        let call_times = Arc::clone(&call_times);
        Arc::new(ScriptedLlmClient::new("one-slot").respond_with("judge", move |prompt| {
            let post = if prompt.contains("Post number 0") { 0 } else { 1 };
            call_times.lock().unwrap().push((post, started.elapsed()));
            if post == 0 && !throttled_once.swap(true, Ordering::SeqCst) {
                return Err(LlmError::RateLimit("slow down".to_string()));
            }
            Ok(RELEVANT.to_string())
        })
        .respond_with("writer", summary_for))
    };
    let summarizer = Summarizer::new(
        llm.clone(),
        PipelineConfig {
            workers: 1,
            retry: RetryPolicy::default(),
        },
        "/tmp/newsletters",
    );

    let newsletter = summarizer
        .summarize_post_list(&sample_list(2), &models(&["judge"]), &models(&["writer"]), Some("Rust"), None)
        .await
        .unwrap();
    assert_eq!(newsletter.len(), 2);

    let times = call_times.lock().unwrap().clone();
    info!("judge calls: {:?}", times);
    let first_call_of_post_1 = times
        .iter()
        .find(|(post, _)| *post == 1)
        .map(|(_, at)| *at)
        .unwrap();
    assert!(
        first_call_of_post_1 < Duration::from_secs(1),
        "post 1 waited {:?} for a slot",
        first_call_of_post_1
    );
    let post_0_retry = times.iter().filter(|(post, _)| *post == 0).nth(1).map(|(_, at)| *at).unwrap();
    assert!(post_0_retry >= Duration::from_secs(15));
}

#[tokio::test]
async fn single_post_helpers_report_missing_results() {
    let llm = Arc::new(
        ScriptedLlmClient::new("helpers")
            .always("judge", Ok("maybe?".to_string()))
            .respond_with("writer", summary_for),
    );
    let summarizer = summarizer(llm.clone(), 1, 1);
    let post = sample_post(9);

    assert_eq!(
        summarizer.filter_post(&post, &models(&["judge"]), Some("Rust")).await.unwrap(),
        None
    );
    assert_eq!(summarizer.filter_post(&post, &models(&["judge"]), None).await.unwrap(), Some(true));
    assert_eq!(
        summarizer.filter_post(&post, &models(&["judge"]), Some(" \n ")).await.unwrap(),
        Some(true)
    );
    // two attempts for the real profile, none for the missing or blank one
    assert_eq!(llm.calls_for("judge"), 2);

    let news = summarizer.summarize_post(&post, &models(&["writer"])).await.unwrap().unwrap();
    assert_eq!(news.title, "Post number 9");

    let stage = SummarizationStage::new();
    let state = run_item(
        llm.as_ref(),
        &stage,
        &post,
        &[],
        &fast_policy(1),
        &WorkerPool::new(1),
        &CancellationToken::new(),
    )
    .await;
    assert!(state.is_err());
}
