use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};
use tower_offline_cache::layer::{BoxError, OfflineBody};
use tower_offline_cache::prelude::*;

/// Fake network that counts calls and stamps each body with the call number.
#[derive(Clone, Default)]
struct Origin {
    calls: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    not_found: Option<&'static str>,
}

impl Origin {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

impl Service<Request<()>> for Origin {
    type Response = Response<Full<Bytes>>;
    type Error = io::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<()>) -> Self::Future {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.offline.load(Ordering::SeqCst) {
            return std::future::ready(Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "offline",
            )));
        }

        let path = req.uri().path().to_owned();
        let response = if self.not_found == Some(path.as_str()) {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::from("missing"))
        } else {
            Response::builder()
                .header("content-type", "text/plain")
                .body(Full::from(format!("{path} v{n}")))
        };
        std::future::ready(Ok(response.expect("valid response")))
    }
}

async fn layer() -> OfflineLayer<InMemoryBackend> {
    OfflineCache::builder(InMemoryStorage::default())
        .version("test-v1")
        .origin("https://app.example")
        .build()
        .expect("valid configuration")
        .activate()
        .await
        .expect("activate")
}

async fn get(
    service: &mut OfflineService<Origin, InMemoryBackend>,
    uri: &str,
) -> Result<Response<OfflineBody>, BoxError> {
    let request = Request::get(uri).body(()).expect("valid request");
    service.ready().await?.call(request).await
}

async fn body(response: Response<OfflineBody>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn key(uri: &'static str) -> Fingerprint {
    Fingerprint::of(&Uri::from_static(uri)).expect("absolute uri")
}

#[tokio::test]
async fn media_is_fetched_once_then_served_from_store() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let first = get(&mut service, "https://app.example/media/icon.png")
        .await
        .expect("cold fetch");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body(first).await, "/media/icon.png v1");
    assert_eq!(origin.calls(), 1);

    let second = get(&mut service, "https://app.example/media/icon.png")
        .await
        .expect("warm hit");
    assert_eq!(second.headers()["content-type"], "text/plain");
    assert_eq!(body(second).await, "/media/icon.png v1");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 1, "non-hero media hits never touch the network");
}

#[tokio::test]
async fn hero_hit_refreshes_in_background_exactly_once() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let cold = get(&mut service, "https://app.example/media/hero.jpg")
        .await
        .expect("cold fetch");
    assert_eq!(body(cold).await, "/media/hero.jpg v1");

    let warm = get(&mut service, "https://app.example/media/hero.jpg")
        .await
        .expect("warm hit");
    assert_eq!(body(warm).await, "/media/hero.jpg v1");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 2);

    let entry = layer
        .store()
        .get(&key("https://app.example/media/hero.jpg"))
        .await
        .expect("store readable")
        .expect("entry present");
    assert_eq!(entry.body, "/media/hero.jpg v2");
}

#[tokio::test]
async fn media_miss_while_offline_is_an_error() {
    let layer = layer().await;
    let origin = Origin::default();
    origin.go_offline();
    let mut service = layer.layer(origin.clone());

    let err = get(&mut service, "https://app.example/media/clip.mp4")
        .await
        .expect_err("nothing stored to fall back on");
    assert!(err.to_string().contains("offline"));
}

#[tokio::test]
async fn cold_default_request_waits_for_network_and_stores() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let response = get(&mut service, "https://app.example/index.html")
        .await
        .expect("network answer");
    assert_eq!(body(response).await, "/index.html v1");

    let entry = layer
        .store()
        .get(&key("https://app.example/index.html"))
        .await
        .expect("store readable");
    assert!(entry.is_some());
}

#[tokio::test]
async fn cold_default_request_fails_when_network_fails() {
    let layer = layer().await;
    let origin = Origin::default();
    origin.go_offline();
    let mut service = layer.layer(origin.clone());

    assert!(get(&mut service, "https://app.example/index.html")
        .await
        .is_err());
    let entry = layer
        .store()
        .get(&key("https://app.example/index.html"))
        .await
        .expect("store readable");
    assert!(entry.is_none());
}

#[tokio::test]
async fn non_ok_responses_are_returned_but_not_stored() {
    let layer = layer().await;
    let origin = Origin {
        not_found: Some("/gone"),
        ..Origin::default()
    };
    let mut service = layer.layer(origin.clone());

    for _ in 0..2 {
        let response = get(&mut service, "https://app.example/gone")
            .await
            .expect("network answer");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    assert_eq!(origin.calls(), 2);
    let entry = layer
        .store()
        .get(&key("https://app.example/gone"))
        .await
        .expect("store readable");
    assert!(entry.is_none());
}

#[tokio::test]
async fn warm_default_request_serves_stale_then_refreshed() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let cold = get(&mut service, "https://app.example/app.js")
        .await
        .expect("cold fetch");
    assert_eq!(body(cold).await, "/app.js v1");

    let stale = get(&mut service, "https://app.example/app.js")
        .await
        .expect("warm hit");
    assert_eq!(body(stale).await, "/app.js v1");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 2);

    let refreshed = get(&mut service, "https://app.example/app.js")
        .await
        .expect("warm hit");
    assert_eq!(body(refreshed).await, "/app.js v2");
}

#[tokio::test]
async fn failed_revalidation_keeps_the_stored_entry() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let cold = get(&mut service, "https://app.example/app.css")
        .await
        .expect("cold fetch");
    assert_eq!(body(cold).await, "/app.css v1");

    origin.go_offline();
    let stale = get(&mut service, "https://app.example/app.css")
        .await
        .expect("served from store while offline");
    assert_eq!(body(stale).await, "/app.css v1");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 2);

    let entry = layer
        .store()
        .get(&key("https://app.example/app.css"))
        .await
        .expect("store readable")
        .expect("entry kept");
    assert_eq!(entry.body, "/app.css v1");
}

#[tokio::test]
async fn external_host_uses_stale_while_revalidate() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());
    let uri = "https://raw.githubusercontent.com/org/repo/main/data.json";

    let cold = get(&mut service, uri).await.expect("cold fetch");
    assert_eq!(body(cold).await, "/org/repo/main/data.json v1");

    let stale = get(&mut service, uri).await.expect("warm hit");
    assert_eq!(body(stale).await, "/org/repo/main/data.json v1");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn bypass_domains_never_touch_the_store() {
    let layer = layer().await;
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());
    let uri = "https://project.supabase.co/rest/v1/items";

    let first = get(&mut service, uri).await.expect("network answer");
    assert_eq!(body(first).await, "/rest/v1/items v1");
    let second = get(&mut service, uri).await.expect("network answer");
    assert_eq!(body(second).await, "/rest/v1/items v2");

    assert_eq!(origin.calls(), 2);
    let entry = layer
        .store()
        .get(&key("https://project.supabase.co/rest/v1/items"))
        .await
        .expect("store readable");
    assert!(entry.is_none());

    origin.go_offline();
    assert!(get(&mut service, uri).await.is_err());
}

#[tokio::test]
async fn custom_policy_changes_routing() {
    let layer = OfflineCache::builder(InMemoryStorage::default())
        .version("test-v1")
        .policy(
            RoutePolicy::empty()
                .with_bypass_domains(["api.example"])
                .with_media_prefix("/img/"),
        )
        .build()
        .expect("valid configuration")
        .activate()
        .await
        .expect("activate");
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    get(&mut service, "https://cdn.example/img/a.png")
        .await
        .expect("cold fetch");
    get(&mut service, "https://cdn.example/img/a.png")
        .await
        .expect("warm hit");
    get(&mut service, "https://api.example/v1/me")
        .await
        .expect("bypass");

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn structured_events_do_not_change_answers() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tower_offline_cache=debug")
        .with_test_writer()
        .try_init();

    let layer = OfflineCache::builder(InMemoryStorage::default())
        .version("test-v1")
        .logging(
            LoggingConfig::new()
                .with_enabled(true)
                .with_hash_keys(false),
        )
        .build()
        .expect("valid configuration")
        .activate()
        .await
        .expect("activate");
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    let request = Request::get("https://app.example/index.html")
        .header(tower_offline_cache::request_id::REQUEST_ID_HEADER, "req-1")
        .body(())
        .expect("valid request");
    let response = service
        .ready()
        .await
        .expect("service ready")
        .call(request)
        .await
        .expect("network answer");
    assert_eq!(body(response).await, "/index.html v1");

    let warm = get(&mut service, "https://app.example/index.html")
        .await
        .expect("warm hit");
    assert_eq!(body(warm).await, "/index.html v1");
    layer.revalidator().drain().await;
}

#[tokio::test]
async fn every_warm_hit_refreshes_even_past_the_concurrency_bound() {
    let layer = OfflineCache::builder(InMemoryStorage::default())
        .version("test-v1")
        .max_concurrent_revalidations(1)
        .build()
        .expect("valid configuration")
        .activate()
        .await
        .expect("activate");
    let origin = Origin::default();
    let mut service = layer.layer(origin.clone());

    for uri in ["https://app.example/a", "https://app.example/b"] {
        get(&mut service, uri).await.expect("cold fetch");
    }
    for uri in ["https://app.example/a", "https://app.example/b"] {
        get(&mut service, uri).await.expect("warm hit");
    }

    layer.revalidator().drain().await;
    assert_eq!(origin.calls(), 4, "both warm hits reach the network");
    assert_eq!(layer.revalidator().in_flight(), 0);

    for (uri, stale) in [
        ("https://app.example/a", "/a v1"),
        ("https://app.example/b", "/b v2"),
    ] {
        let fingerprint = Fingerprint::of(&Uri::from_static(uri)).expect("absolute uri");
        let entry = layer
            .store()
            .get(&fingerprint)
            .await
            .expect("store readable")
            .expect("entry present");
        assert_ne!(entry.body, stale, "{uri} was not refreshed");
    }
}
