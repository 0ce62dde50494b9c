//! In-process stand-in for an httpd running mod_cluster
//!
//! Accepts keep-alive MCMP connections on loopback, records every decoded
//! request and answers INFO with a configurable body.

#![allow(dead_code)]

use mcmp::protocol::decode_request;
use mcmp::{
    ConnectorSnapshot, ContextSnapshot, EngineSnapshot, HostSnapshot, McmpRequest, RequestType,
    ServerSnapshot,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<McmpRequest>>,
    info_body: Mutex<String>,
    /// Error type returned for every request while set
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn respond(&self, request: &McmpRequest) -> String {
        if let Some(error_type) = self.failure.lock().clone() {
            return format!(
                "HTTP/1.1 500 Internal Server Error\r\nVersion: 0.2.1\r\nType: {}\r\nMess: {}: rejected\r\nContent-Length: 0\r\n\r\n",
                error_type, error_type
            );
        }
        let body = match request.request_type() {
            RequestType::Info => self.info_body.lock().clone(),
            RequestType::Status => "Type=STATUS-RSP&State=OK&id=1".to_string(),
            RequestType::Dump => "node: [1],Balancer: mycluster,JVMRoute: node1\n".to_string(),
            _ => String::new(),
        };
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }
}

pub struct FakeProxy {
    pub address: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl FakeProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&accept_shared)));
            }
        });

        Self {
            address,
            shared,
            task,
        }
    }

    pub fn requests(&self) -> Vec<McmpRequest> {
        self.shared.requests.lock().clone()
    }

    /// `CMD`, `CMD *` for wildcards or `CMD /path` for context requests
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| match (r.is_wildcard(), r.parameter("Context")) {
                (true, _) => format!("{} *", r.request_type()),
                (false, Some(path)) => format!("{} {}", r.request_type(), path),
                (false, None) => r.request_type().to_string(),
            })
            .collect()
    }

    pub fn clear(&self) {
        self.shared.requests.lock().clear();
    }

    pub fn set_info(&self, body: &str) {
        *self.shared.info_body.lock() = body.to_string();
    }

    pub fn fail_with(&self, error_type: Option<&str>) {
        *self.shared.failure.lock() = error_type.map(str::to_string);
    }
}

impl Drop for FakeProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let mut reader = BufReader::new(socket);
    loop {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }

        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let mut wire = head.into_bytes();
        wire.extend_from_slice(&body);
        let request = decode_request(&wire).expect("well-formed MCMP request");
        let response = shared.respond(&request);
        shared.requests.lock().push(request);

        if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

pub fn context(path: &str, started: bool) -> ContextSnapshot {
    ContextSnapshot {
        engine: "catalina".into(),
        host: "localhost".into(),
        path: path.into(),
        started,
        distributable: false,
    }
}

/// One engine routed as `node1` with `/app` started on `localhost`
pub fn server() -> ServerSnapshot {
    ServerSnapshot {
        engines: vec![EngineSnapshot {
            name: "catalina".into(),
            jvm_route: "node1".into(),
            default_host: Some("localhost".into()),
            hosts: vec![HostSnapshot {
                name: "localhost".into(),
                aliases: Default::default(),
                contexts: vec![context("/app", true)],
            }],
            connector: ConnectorSnapshot::default(),
        }],
    }
}
