//! Advertise receive loop
//!
//! `start` binds the group socket and spawns one task that feeds every
//! datagram to the processor. `close` signals the task over a `watch`
//! channel and waits for it; a receive in progress is abandoned, so closing
//! never waits for the next datagram. A dropped sender counts as a close.

use modcluster_config::{service, AdvertiseConfig};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::processor::{AdvertiseOutcome, AdvertiseProcessor};
use super::server::AdvertisedServer;
use crate::handler::ProxyDiscovery;
use crate::transports::MulticastSocket;
use crate::{McmpError, Result};

/// Receives advertise datagrams on a background task and feeds verified
/// proxies to a `ProxyDiscovery`
pub struct AdvertiseListener {
    group: SocketAddr,
    interface: Option<std::net::IpAddr>,
    processor: Arc<AdvertiseProcessor>,
    listening: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AdvertiseListener {
    pub fn new(config: &AdvertiseConfig, discovery: Arc<dyn ProxyDiscovery>) -> Result<Self> {
        let group = config.group();
        if !group.ip().is_multicast() {
            return Err(McmpError::configuration(
                format!("Advertise group {} is not a multicast address", group.ip()),
                Some("group_address"),
            ));
        }

        Ok(Self {
            group,
            interface: config.interface,
            processor: Arc::new(AdvertiseProcessor::new(
                config.security_key.as_deref(),
                discovery,
            )),
            listening: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Bind, join the group and spawn the receive loop. Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.task.lock().is_some() {
            return Ok(());
        }

        let socket = MulticastSocket::bind(self.group, self.interface).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor = Arc::clone(&self.processor);
        let listening = Arc::clone(&self.listening);
        listening.store(true, Ordering::Release);

        let handle = tokio::spawn(receive_loop(socket, processor, listening, shutdown_rx));

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.task.lock() = Some(handle);
        info!(group = %self.group, "Advertise listener started");
        Ok(())
    }

    /// Stop the receive loop and wait for it to finish
    pub async fn close(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Advertise listener task failed: {}", e);
            }
            info!(group = %self.group, "Advertise listener stopped");
        }
        self.listening.store(false, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }

    pub fn processor(&self) -> &Arc<AdvertiseProcessor> {
        &self.processor
    }

    pub fn server(&self, name: &str) -> Option<AdvertisedServer> {
        self.processor.server(name)
    }

    pub fn servers(&self) -> Vec<AdvertisedServer> {
        self.processor.servers()
    }
}

async fn receive_loop(
    socket: MulticastSocket,
    processor: Arc<AdvertiseProcessor>,
    listening: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let backoff = Duration::from_millis(service::advertise::ERROR_BACKOFF_MS);

    loop {
        tokio::select! {
            // A dropped sender is a shutdown too
            _ = shutdown.changed() => break,
            received = socket.recv() => match received {
                Ok((datagram, from)) => {
                    listening.store(true, Ordering::Release);
                    match processor.process_datagram(&datagram).await {
                        AdvertiseOutcome::Rejected(_) => {}
                        outcome => debug!(from = %from, ?outcome, "Advertise datagram accepted"),
                    }
                }
                Err(e) => {
                    listening.store(false, Ordering::Release);
                    warn!("Advertise receive failed: {}", e);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    socket.leave();
    listening.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertise::build_datagram;
    use socket2::{Domain, Protocol, Socket, Type};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::timeout;

    const GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 105);

    struct Ignore;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SocketAddr>>);

    impl ProxyDiscovery for Recorder {
        fn add_proxy(&self, address: SocketAddr) -> bool {
            self.0.lock().push(address);
            true
        }
    }

    /// Sends multicast out of the loopback interface so it loops back locally
    fn loopback_sender() -> tokio::net::UdpSocket {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        socket.set_multicast_if_v4(&Ipv4Addr::LOCALHOST).unwrap();
        socket.set_multicast_loop_v4(true).unwrap();
        socket.set_nonblocking(true).unwrap();
        socket
            .bind(&SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0).into())
            .unwrap();
        tokio::net::UdpSocket::from_std(socket.into()).unwrap()
    }

    fn free_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_receive_loop_discovers_proxy_and_closes_promptly() {
        let config = AdvertiseConfig {
            group_address: IpAddr::V4(GROUP),
            port: free_port(),
            interface: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            security_key: Some("secret".into()),
            ..Default::default()
        };
        let recorder = Arc::new(Recorder::default());
        let listener = AdvertiseListener::new(&config, recorder.clone()).unwrap();
        listener.start().await.unwrap();
        assert!(listener.is_listening());

        let datagram = build_datagram(
            Some("secret"),
            "200 OK",
            "Mon, 19 Oct 2026 10:00:00 GMT",
            1,
            "srv-1",
            &[("X-Manager-Address", "10.0.0.5:6666")],
        );
        let sender = loopback_sender();
        timeout(Duration::from_secs(5), async {
            while recorder.0.lock().is_empty() {
                sender.send_to(&datagram, (GROUP, config.port)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*recorder.0.lock(), vec!["10.0.0.5:6666".parse().unwrap()]);
        assert!(listener.server("srv-1").is_some());

        // Nothing more is sent, so the loop is parked in recv()
        timeout(Duration::from_secs(1), listener.close()).await.unwrap();
        assert!(!listener.is_listening());
    }

    impl ProxyDiscovery for Ignore {
        fn add_proxy(&self, _address: SocketAddr) -> bool {
            false
        }
    }

    #[test]
    fn test_rejects_non_multicast_group() {
        let config = AdvertiseConfig {
            group_address: "10.0.0.1".parse().unwrap(),
            ..Default::default()
        };
        let err = AdvertiseListener::new(&config, Arc::new(Ignore)).err().unwrap();
        assert!(matches!(err, McmpError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let listener = AdvertiseListener::new(&AdvertiseConfig::default(), Arc::new(Ignore)).unwrap();
        assert!(!listener.is_listening());
        listener.close().await;
        assert!(listener.servers().is_empty());
    }
}
