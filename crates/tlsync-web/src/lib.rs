//! HTTP surface: the active-URL listing consumed by probes and the push mock.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{OriginalUri, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, on, MethodFilter},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tlsync_core::GLOBAL_ALPHA_2;
use tlsync_storage::{StoreError, UrlListing, UrlQuery, UrlStore};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

pub const CRATE_NAME: &str = "tlsync-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UrlStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn UrlStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize, Default)]
struct UrlsQuery {
    country_code: Option<String>,
    category_codes: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Metadata {
    count: i64,
    current_page: i64,
    limit: i64,
    pages: i64,
    next_url: String,
}

#[derive(Debug, Serialize)]
struct UrlsResponse {
    metadata: Metadata,
    results: Vec<UrlListing>,
}

pub fn app(state: AppState) -> Router {
    let push_methods = MethodFilter::GET
        .or(MethodFilter::POST)
        .or(MethodFilter::PUT)
        .or(MethodFilter::HEAD);
    Router::new()
        .route("/api/v1/test-list/urls", get(urls_handler))
        .route("/api/push", on(push_methods, push_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(store: Arc<dyn UrlStore>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving test-list api");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

async fn urls_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlsQuery>,
) -> Response {
    match list_urls(state.store.as_ref(), query).await {
        Ok(body) => Json(body).into_response(),
        Err(ApiError::BadRequest(message)) => {
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message })))
                .into_response()
        }
        Err(ApiError::Store(err)) => {
            error!(error = %err, "failed to list test-list urls");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "server side error" })),
            )
                .into_response()
        }
    }
}

enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

async fn list_urls(store: &dyn UrlStore, query: UrlsQuery) -> Result<UrlsResponse, ApiError> {
    let mut country_codes = vec![GLOBAL_ALPHA_2.to_string()];
    if let Some(code) = non_empty(query.country_code.as_deref()) {
        let code = code.to_ascii_uppercase();
        let known = store.countries().await?;
        if !known.iter().any(|c| c.alpha_2 == code) {
            return Err(ApiError::BadRequest("invalid country_code".into()));
        }
        if code != GLOBAL_ALPHA_2 {
            country_codes.push(code);
        }
    }

    let mut category_codes = Vec::new();
    if let Some(codes) = non_empty(query.category_codes.as_deref()) {
        let known = store.categories().await?;
        for code in codes.split(',').map(|c| c.trim().to_ascii_uppercase()) {
            if !known.iter().any(|c| c.code == code) {
                return Err(ApiError::BadRequest("invalid category_codes".into()));
            }
            category_codes.push(code);
        }
    }

    let limit = query.limit.filter(|limit| *limit > 0);
    let listings = store
        .active_urls(&UrlQuery {
            country_codes,
            category_codes,
            limit,
        })
        .await?;
    let results: Vec<UrlListing> = listings
        .into_iter()
        .filter(|listing| {
            let valid = is_valid_test_url(&listing.url);
            if !valid {
                warn!(url = %listing.url, "invalid url, skipping");
            }
            valid
        })
        .collect();

    let metadata = match limit {
        None => Metadata {
            count: results.len() as i64,
            current_page: -1,
            limit: -1,
            pages: 1,
            next_url: String::new(),
        },
        Some(limit) => Metadata {
            count: -1,
            current_page: -1,
            limit,
            pages: -1,
            next_url: String::new(),
        },
    };
    Ok(UrlsResponse { metadata, results })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Absolute http(s) URL with a host.
pub fn is_valid_test_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|h| !h.is_empty())
                && !url.path().is_empty()
        }
        Err(_) => false,
    }
}

async fn push_handler(method: Method, OriginalUri(uri): OriginalUri, body: Bytes) -> &'static str {
    let payload = serde_json::from_slice::<serde_json::Value>(&body)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
    info!(%method, path = %uri, payload = %payload, "push notification received");
    "scheduled!"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use tlsync_core::{countries::reference_countries, NewCategory, NewUrl};
    use tlsync_storage::MemoryStore;
    use tower::ServiceExt;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_countries(&reference_countries()).await.unwrap();
        store
            .insert_categories(&["NEWS", "FEXP"].map(|code| NewCategory {
                code: code.into(),
                description: code.into(),
                long_description: None,
                old_codes: Vec::new(),
            }))
            .await
            .unwrap();
        let countries = store.countries().await.unwrap();
        let categories = store.categories().await.unwrap();
        let country = |code: &str| countries.iter().find(|c| c.alpha_2 == code).unwrap().id;
        let category = |code: &str| categories.iter().find(|c| c.code == code).unwrap().id;

        for (url, cat, cc, active) in [
            ("http://example.com/", "FEXP", "IT", true),
            ("https://news.example.org/a", "NEWS", "IT", true),
            ("http://global.example.net/", "NEWS", "XX", true),
            ("http://gone.example.com/", "NEWS", "IT", false),
            ("http://other.example.com/", "NEWS", "DE", true),
            ("ftp://files.example.com/", "NEWS", "XX", true),
        ] {
            store
                .insert_unchecked(
                    NewUrl {
                        url: url.into(),
                        category_id: category(cat),
                        country_id: country(cc),
                        date_added: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
                        source: String::new(),
                        notes: String::new(),
                    },
                    active,
                )
                .await;
        }
        store
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn lists_global_and_country_urls() {
        let app = app(AppState::new(Arc::new(store().await)));
        let (status, body) = get_json(app, "/api/v1/test-list/urls?country_code=it").await;
        assert_eq!(status, StatusCode::OK);
        let mut urls: Vec<_> = body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["url"].as_str().unwrap().to_string())
            .collect();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "http://example.com/",
                "http://global.example.net/",
                "https://news.example.org/a"
            ]
        );
        assert_eq!(body["metadata"]["count"], 3);
        assert_eq!(body["metadata"]["pages"], 1);
    }

    #[tokio::test]
    async fn filters_by_category_and_limit() {
        let app = app(AppState::new(Arc::new(store().await)));
        let (status, body) = get_json(
            app,
            "/api/v1/test-list/urls?country_code=IT&category_codes=fexp&limit=100",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["category_code"], "FEXP");
        assert_eq!(results[0]["country_code"], "IT");
        assert_eq!(body["metadata"]["limit"], 100);
        assert_eq!(body["metadata"]["count"], -1);
    }

    #[tokio::test]
    async fn unknown_codes_are_rejected() {
        let app = app(AppState::new(Arc::new(store().await)));
        let (status, body) =
            get_json(app.clone(), "/api/v1/test-list/urls?country_code=QQ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid country_code");

        let (status, _) = get_json(app, "/api/v1/test-list/urls?category_codes=NEWS,NOPE").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn push_mock_accepts_payloads() {
        let app = app(AppState::new(Arc::new(MemoryStore::new())));
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/push")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"notifications":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"scheduled!");

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri("/api/push")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_test_url("http://example.com/"));
        assert!(is_valid_test_url("https://example.com"));
        assert!(!is_valid_test_url("ftp://example.com/"));
        assert!(!is_valid_test_url("example.com"));
        assert!(!is_valid_test_url("http://"));
    }
}
