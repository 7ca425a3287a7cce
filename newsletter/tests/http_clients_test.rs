use newsletter::config::RedditCredentials;
use newsletter::fetcher::{FetchConfig, RedditClient};
use newsletter::llm_adapter::{GenerationOptions, LlmClient, LlmError};
use newsletter::providers::{ChatCompletionClient, LlmPlatform};
use newsletter::sources::reddit_model::CommentThing;
use newsletter::sources::webpage::parse_article;
use newsletter::traits::SubmissionSource;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn chat_client(server: &MockServer) -> ChatCompletionClient {
    ChatCompletionClient::new(LlmPlatform::TogetherAi, "test-key")
        .unwrap()
        .with_base_url(&server.uri())
}

#[tokio::test]
async fn chat_completion_returns_the_first_message() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "Say hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = chat_client(&server).await;
    let options = GenerationOptions::default().with_max_tokens(256);
    let output = client
        .generate("Say hi", "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo", Some(&options))
        .await
        .unwrap();

    assert_eq!(output, "hi");
    assert_eq!(client.client_name(), "Together AI");
}

#[tokio::test]
async fn chat_completion_statuses_map_onto_the_retry_taxonomy() {
    init_tracing();

    let cases = [
        (401, "authentication"),
        (403, "authentication"),
        (429, "rate_limit"),
        (502, "unavailable"),
        (503, "unavailable"),
        (504, "unavailable"),
        (500, "api"),
        (400, "api"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let error = chat_client(&server)
            .await
            .generate("prompt", "model", None)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&error), expected, "status {} mapped to {:?}", status, error);
        if let LlmError::Api { status: reported, .. } = error {
            assert_eq!(reported, status);
        }
    }
}

fn error_kind(error: &LlmError) -> &'static str {
    match error {
        LlmError::Authentication(_) => "authentication",
        LlmError::RateLimit(_) => "rate_limit",
        LlmError::ServiceUnavailable(_) => "unavailable",
        LlmError::Api { .. } => "api",
        LlmError::Transport(_) => "transport",
        LlmError::InvalidResponse(_) => "invalid_response",
    }
}

#[tokio::test]
async fn chat_completion_without_content_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let error = chat_client(&server)
        .await
        .generate("prompt", "model", None)
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::InvalidResponse(_)));
}

#[test]
fn platforms_list_their_models() {
    for platform in LlmPlatform::ALL {
        assert!(!platform.model_ids().is_empty(), "{} has no models", platform);
    }
    assert_eq!(
        LlmPlatform::TogetherAi.alias("meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo"),
        Some("Llama-3.1-70B")
    );
    assert_eq!(LlmPlatform::OpenAi.alias("unknown"), None);
}

fn credentials() -> RedditCredentials {
    RedditCredentials {
        client_id: "script-id".to_string(),
        client_secret: "script-secret".to_string(),
        user_agent: "newsletter-tests/0.1".to_string(),
        username: "bot".to_string(),
        password: "hunter2".to_string(),
    }
}

fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_seconds: 5,
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        min_request_interval: Duration::ZERO,
        comment_limit: 20,
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-123",
            "token_type": "bearer",
            "expires_in": 86400,
            "scope": "*"
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn reddit_client_fetches_hot_submissions_with_comments() {
    init_tracing();
    let server = MockServer::start().await;
    mount_token(&server).await;

    // first listing request fails once and is retried
    Mock::given(method("GET"))
        .and(path("/r/rust/hot"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/hot"))
        .and(query_param("limit", "2"))
        .and(query_param("raw_json", "1"))
        .and(header("authorization", "Bearer token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    {"kind": "t3", "data": {
                        "id": "first", "title": "First", "author": "a", "is_self": true,
                        "selftext": "hello", "url": "https://www.reddit.com/r/rust/comments/first/",
                        "ups": 10, "upvote_ratio": 0.9, "created_utc": 1717000000.0,
                        "permalink": "/r/rust/comments/first/first/", "media": null
                    }},
                    {"kind": "t3", "data": {
                        "id": "second", "title": "Second", "author": "b", "is_self": false,
                        "url": "https://i.redd.it/x.png", "ups": 5, "upvote_ratio": 1.0,
                        "created_utc": 1717000500.0, "permalink": "/r/rust/comments/second/second/"
                    }}
                ]
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/comments/first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"kind": "Listing", "data": {"children": []}},
            {"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {"id": "c1", "author": "x", "body": "nice", "ups": 3, "score": 3, "created_utc": 1717000100.0}},
                {"kind": "more", "data": {"count": 12, "children": ["c9"]}}
            ]}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/comments/second"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = RedditClient::new(credentials(), fast_fetch_config())
        .unwrap()
        .with_base_urls(server.uri(), server.uri());

    let submissions = client.hot("rust", 2).await.unwrap();

    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].id, "first");
    assert_eq!(submissions[0].comments.len(), 2);
    assert!(matches!(submissions[0].comments[0], CommentThing::Comment(_)));
    assert!(matches!(submissions[0].comments[1], CommentThing::More(_)));
    assert!(submissions[1].comments.is_empty());
}

#[tokio::test]
async fn reddit_client_reports_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let client = RedditClient::new(credentials(), fast_fetch_config())
        .unwrap()
        .with_base_urls(server.uri(), server.uri());

    let error = client.hot("rust", 5).await.unwrap_err();
    assert!(error.to_string().contains("invalid_grant"), "got {}", error);
}

#[test]
fn article_fields_come_from_metadata_and_paragraphs() {
    let html = r#"<!doctype html>
        <html><head>
            <title>Fallback title</title>
            <meta property="og:title" content="Rust 1.80 released">
            <meta property="og:url" content="https://blog.example.com/rust-180">
            <meta property="article:published_time" content="2024-07-25T14:00:00+00:00">
            <meta name="author" content="The Release Team">
        </head><body>
            <nav><p>Menu</p></nav>
            <article>
                <p>LazyCell and LazyLock are stable.</p>
                <p>Exclusive   ranges in patterns.</p>
            </article>
        </body></html>"#;

    let page = parse_article(html, "https://blog.example.com/rust-180?utm=feed");

    assert_eq!(page.title.as_deref(), Some("Rust 1.80 released"));
    assert_eq!(
        page.body.as_deref(),
        Some("LazyCell and LazyLock are stable.\n\nExclusive ranges in patterns.")
    );
    assert_eq!(page.url.as_deref(), Some("https://blog.example.com/rust-180"));
    assert_eq!(page.authors, Some(vec!["The Release Team".to_string()]));
    assert_eq!(
        page.published_at.map(|t| t.to_rfc3339()),
        Some("2024-07-25T14:00:00+00:00".to_string())
    );

    let bare = parse_article("<html><head><title> Plain </title></head><body><p>Only text</p></body></html>", "https://x.test/");
    assert_eq!(bare.title.as_deref(), Some("Plain"));
    assert_eq!(bare.body.as_deref(), Some("Only text"));
    assert_eq!(bare.url.as_deref(), Some("https://x.test/"));
    assert_eq!(bare.authors, None);
}
