//! End to end: real HTTP origin, on-disk cache, origin going away.

use std::sync::Arc;

use pwa_net::{HttpFetcher, LoaderConfig, Request};
use pwa_sw::{AgentConfig, CacheStorage, DiskCacheStorage, NoopPlatform, OfflineAgent};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_core_assets(server: &MockServer) {
    for asset in pwa_sw::CORE_ASSETS {
        Mock::given(method("GET"))
            .and(path(asset))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string(format!("asset {asset}")),
            )
            .mount(server)
            .await;
    }
}

async fn agent_for(scope: Url, cache_dir: &std::path::Path) -> OfflineAgent {
    let storage = Arc::new(DiskCacheStorage::open_dir(cache_dir).await.unwrap());
    let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default()).unwrap());
    OfflineAgent::new(AgentConfig::for_scope(scope), storage, fetcher, Arc::new(NoopPlatform))
        .unwrap()
}

#[tokio::test]
async fn test_cached_shell_survives_restart_and_origin_outage() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    serve_core_assets(&server).await;
    let scope = Url::parse(&format!("{}/", server.uri())).unwrap();

    {
        let agent = agent_for(scope.clone(), dir.path()).await;
        agent.install().await.unwrap();
        agent.activate().await.unwrap();
    }

    drop(server);

    let agent = agent_for(scope.clone(), dir.path()).await;

    let page = agent
        .handle_fetch(&Request::navigate(scope.join("/showtimes").unwrap()))
        .await
        .unwrap()
        .unwrap();
    assert!(page.from_cache);
    assert_eq!(page.text().unwrap(), "asset /");
    assert_eq!(page.content_type().unwrap().essence_str(), "text/plain");

    let icon = agent
        .handle_fetch(&Request::get(scope.join("/static/icons/icon-192.png").unwrap()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(icon.text().unwrap(), "asset /static/icons/icon-192.png");

    assert!(agent
        .handle_fetch(&Request::get(scope.join("/api/showtimes").unwrap()))
        .await
        .is_err());
}

#[tokio::test]
async fn test_install_against_incomplete_origin_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("index"))
        .mount(&server)
        .await;
    let scope = Url::parse(&format!("{}/", server.uri())).unwrap();

    let agent = agent_for(scope, dir.path()).await;
    assert!(agent.install().await.is_err());

    let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
    assert!(storage.entries_in("movie-pwa-v1").await.unwrap().is_empty());
}
