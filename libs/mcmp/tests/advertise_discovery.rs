//! Advertised proxies join the handler and are reconciled like static ones

mod common;

use common::{server, FakeProxy};
use mcmp::advertise::{build_datagram, AdvertiseOutcome, AdvertiseProcessor};
use mcmp::recovery::DefaultResetRequestSource;
use mcmp::{McmpHandler, NodeRegistry, ProxyDiscovery, ProxyState, RequestFactory};
use modcluster_config::ProxyConfig;
use std::sync::Arc;

const DATE: &str = "Mon, 19 Oct 2026 10:00:00 GMT";

fn handler() -> Arc<McmpHandler> {
    let registry = Arc::new(NodeRegistry::new(&[]));
    registry.replace(server());
    let reset_source = Arc::new(DefaultResetRequestSource::new(
        registry.clone(),
        RequestFactory::default(),
    ));
    let config = ProxyConfig {
        socket_timeout_ms: 2_000,
        ..Default::default()
    };
    Arc::new(McmpHandler::new(&config, reset_source, Some(registry)).unwrap())
}

#[tokio::test]
async fn test_advertised_proxy_is_added_and_recovered() {
    let proxy = FakeProxy::start().await;
    let handler = handler();
    let discovery: Arc<dyn ProxyDiscovery> = handler.clone();
    let processor = AdvertiseProcessor::new(Some("secret"), discovery);

    let manager = proxy.address.to_string();
    let datagram = build_datagram(
        Some("secret"),
        "200 OK",
        DATE,
        1,
        "httpd-1",
        &[("X-Manager-Address", manager.as_str())],
    );
    assert_eq!(
        processor.process_datagram(&datagram).await,
        AdvertiseOutcome::Discovered {
            server: "httpd-1".into(),
            proxy: Some(proxy.address),
        }
    );
    assert_eq!(handler.proxy_state(proxy.address), Some(ProxyState::Error));

    // Later announcements refresh the record without re-adding the proxy
    let datagram = build_datagram(
        Some("secret"),
        "200 OK",
        DATE,
        2,
        "httpd-1",
        &[("X-Manager-Address", manager.as_str())],
    );
    assert_eq!(
        processor.process_datagram(&datagram).await,
        AdvertiseOutcome::Updated {
            server: "httpd-1".into()
        }
    );
    assert_eq!(handler.len(), 1);
    assert_eq!(processor.server("httpd-1").unwrap().sequence, "2");

    handler.status().await;
    assert_eq!(handler.proxy_state(proxy.address), Some(ProxyState::Ok));
    assert_eq!(
        proxy.commands(),
        ["INFO", "REMOVE-APP *", "CONFIG", "ENABLE-APP /app"]
    );
}

#[tokio::test]
async fn test_forged_announcement_adds_nothing() {
    let proxy = FakeProxy::start().await;
    let handler = handler();
    let discovery: Arc<dyn ProxyDiscovery> = handler.clone();
    let processor = AdvertiseProcessor::new(Some("secret"), discovery);

    let manager = proxy.address.to_string();
    let datagram = build_datagram(
        Some("other-key"),
        "200 OK",
        DATE,
        1,
        "httpd-1",
        &[("X-Manager-Address", manager.as_str())],
    );
    assert!(matches!(
        processor.process_datagram(&datagram).await,
        AdvertiseOutcome::Rejected(_)
    ));
    assert!(handler.is_empty());
    assert!(processor.servers().is_empty());

    handler.status().await;
    assert!(proxy.commands().is_empty());
}
