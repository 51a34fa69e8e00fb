use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use clap::Parser;
use scraper::{Html, Selector};
use tower::ServiceExt;
use url::Url;

use spideriment_web::api::{AppState, create_router};
use spideriment_web::config::Config;
use spideriment_web::data_models::{SearchQuery, SearchResultItem};
use spideriment_web::error::FrontendError;
use spideriment_web::search_client::{
    BackendResults, HttpSearchBackend, SearchBackend, SearchClient,
};

mod test_helpers {
    use super::*;

    #[derive(Clone, Copy)]
    pub enum Behaviour {
        Results { count: usize, total: Option<u64> },
        Unavailable,
        Protocol,
        Hang,
    }

    /// In-process stand-in for the search server that counts how often it is asked.
    pub struct FakeBackend {
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
        pub last_query: std::sync::Mutex<Option<SearchQuery>>,
    }

    impl FakeBackend {
        pub fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                last_query: std::sync::Mutex::new(None),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_query(&self) -> Option<SearchQuery> {
            self.last_query.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        async fn search(&self, query: &SearchQuery) -> Result<BackendResults, FrontendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(query.clone());

            match self.behaviour {
                Behaviour::Results { count, total } => Ok(BackendResults {
                    items: (0..count)
                        .map(|i| SearchResultItem {
                            title: format!("{} result {i}", query.text()),
                            url: format!("https://example.org/{i}"),
                            snippet: format!("about {} number {i}", query.text()),
                            score: None,
                        })
                        .collect(),
                    total_estimate: total,
                    elapsed: Some(Duration::from_millis(5)),
                }),
                Behaviour::Unavailable => Err(FrontendError::SearchUnavailable(
                    "connect to 10.1.2.3:7777 refused".to_string(),
                )),
                Behaviour::Protocol => Err(FrontendError::SearchProtocol(
                    "missing field `title` at line 1".to_string(),
                )),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(BackendResults::default())
                }
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    pub fn config(static_dir: &Path) -> Config {
        Config::try_parse_from([
            "spideriment-web",
            "--backend-url",
            "http://127.0.0.1:9",
            "--static-dir",
            static_dir.to_str().unwrap(),
            "--max-query-length",
            "32",
        ])
        .unwrap()
    }

    pub fn app_with(backend: Arc<dyn SearchBackend>, timeout: Duration) -> Router {
        let config = config(Path::new("static"));
        create_router(AppState::new(config, SearchClient::new(backend, timeout)))
    }

    pub fn app(backend: Arc<FakeBackend>) -> Router {
        app_with(backend, Duration::from_secs(2))
    }

    pub async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    pub fn result_titles(html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("li.result .result-title").unwrap();
        document
            .select(&selector)
            .map(|e| e.text().collect::<String>())
            .collect()
    }

    pub fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }
}

use test_helpers::*;

mod landing {
    use super::*;

    #[tokio::test]
    async fn test_root_serves_landing_page() {
        let backend = FakeBackend::new(Behaviour::Unavailable);
        let (status, body) = get(app(backend.clone()), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<form class=\"search-form\""));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_query_skips_backend() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 3,
            total: None,
        });

        for uri in ["/search", "/search?q=", "/search?q=%20%20%20", "/search?page=4"] {
            let (status, body) = get(app(backend.clone()), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(body.contains("class=\"landing\""), "{uri}");
        }
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found_page() {
        let backend = FakeBackend::new(Behaviour::Unavailable);
        let (status, body) = get(app(backend), "/does-not-exist").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Page not found"));
    }
}

mod search {
    use super::*;

    #[tokio::test]
    async fn test_cat_query_lists_results() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 2,
            total: Some(2),
        });
        let (status, body) = get(app(backend.clone()), "/search?q=cat&page=0").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(result_titles(&body), vec!["cat result 0", "cat result 1"]);
        assert!(!body.contains("class=\"next\""));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_next_link_when_more_results_exist() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 2,
            total: Some(9),
        });
        let (status, body) = get(app(backend), "/search?q=cat&max=2").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/search?q=cat&amp;page=1&amp;max=2\""));
    }

    #[tokio::test]
    async fn test_query_text_is_echoed_escaped() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 1,
            total: None,
        });
        let (status, body) = get(
            app(backend),
            "/search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn test_parameters_are_normalized() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 0,
            total: None,
        });
        let (status, _) = get(
            app(backend.clone()),
            "/search?q=%20%20rust%20%20&page=-3&max=abc&qbs=on",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let query = backend.last_query().unwrap();
        assert_eq!(query.text(), "rust");
        assert_eq!(query.page(), 0);
        assert_eq!(query.page_size(), 10);
        assert!(query.use_quotient_based_scoring());
    }

    #[tokio::test]
    async fn test_scoring_stays_off_when_default_is_on() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 10,
            total: Some(30),
        });
        let mut config = config(Path::new("static"));
        config.quotient_scoring = true;
        let router = || {
            create_router(AppState::new(
                config.clone(),
                SearchClient::new(backend.clone(), Duration::from_secs(2)),
            ))
        };

        let (_, landing) = get(router(), "/").await;
        assert!(landing.contains("value=\"1\" checked"));

        let (status, body) = get(router(), "/search?q=cat&max=10").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!backend.last_query().unwrap().use_quotient_based_scoring());
        assert!(body.contains("/search?q=cat&amp;page=1&amp;max=10&amp;qbs=0"));

        get(router(), "/search?q=cat&page=1&max=10&qbs=0").await;
        let query = backend.last_query().unwrap();
        assert_eq!(query.page(), 1);
        assert!(!query.use_quotient_based_scoring());
    }

    #[tokio::test]
    async fn test_oversized_values_are_clamped() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 0,
            total: None,
        });
        let long_query = "a".repeat(100);
        let (status, _) = get(
            app(backend.clone()),
            &format!("/search?q={long_query}&max=100000&page=2"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let query = backend.last_query().unwrap();
        assert_eq!(query.text().len(), 32);
        assert_eq!(query.page_size(), 100);
        assert_eq!(query.offset(), 200);
    }

    #[tokio::test]
    async fn test_control_characters_are_bad_request() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 1,
            total: None,
        });
        let (status, body) = get(app(backend.clone()), "/search?q=cat%00dog").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Invalid search query"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_same_query_renders_same_results() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 4,
            total: Some(4),
        });
        let (_, first) = get(app(backend.clone()), "/search?q=same&max=4").await;
        let (_, second) = get(app(backend.clone()), "/search?q=same&max=4").await;

        assert_eq!(result_titles(&first), result_titles(&second));
        assert_eq!(first, second);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_responses_are_html() {
        let backend = FakeBackend::new(Behaviour::Results {
            count: 1,
            total: None,
        });
        let response = app(backend)
            .oneshot(
                Request::builder()
                    .uri("/search?q=cat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_backend_is_bad_gateway() {
        let backend = FakeBackend::new(Behaviour::Unavailable);
        let (status, body) = get(app(backend), "/search?q=cat").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("Search server unavailable"));
        assert!(!body.contains("10.1.2.3"));
        assert!(!body.contains("refused"));
    }

    #[tokio::test]
    async fn test_protocol_error_is_bad_gateway() {
        let backend = FakeBackend::new(Behaviour::Protocol);
        let (status, body) = get(app(backend), "/search?q=cat").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.contains("missing field"));
    }

    #[tokio::test]
    async fn test_hung_backend_is_gateway_timeout() {
        let backend = FakeBackend::new(Behaviour::Hang);
        let timeout = Duration::from_millis(150);

        let start = Instant::now();
        let (status, body) = get(app_with(backend, timeout), "/search?q=cat").await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body.contains("Search timed out"));
        assert!(start.elapsed() < timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connection_refused_end_to_end() {
        let port = closed_port();
        let url = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let backend =
            HttpSearchBackend::new(&url, Duration::from_secs(2), Duration::from_millis(500))
                .unwrap();
        let (status, body) = get(
            app_with(Arc::new(backend), Duration::from_secs(2)),
            "/search?q=cat",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.contains(&port.to_string()));
        assert!(!body.contains("127.0.0.1"));
        assert!(!body.to_lowercase().contains("error trying to connect"));
    }
}

mod static_files {
    use super::*;

    #[tokio::test]
    async fn test_serves_assets_from_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "body { color: black; }").unwrap();

        let backend = FakeBackend::new(Behaviour::Unavailable);
        let config = config(dir.path());
        let app = create_router(AppState::new(
            config,
            SearchClient::new(backend, Duration::from_secs(1)),
        ));

        let (status, body) = get(app, "/static/style.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body { color: black; }");
    }
}
