use anyhow::{bail, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Client, Method, Request, Response, StatusCode,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::internal::data_types::ParticipantId;
use crate::signaling::loopback::LoopbackSignaling;
use crate::signaling::{SignalEnvelope, SignalingChannel};

// testing
// calls require signaling to ring, answer and negotiate media. a signaling server is
// provided for development purposes. This will allow the developers to test calls
// between two processes without integrating this library into another application.
//
// every process runs a server which accepts envelopes on POST /signal and drops them
// into a local hub. participants served elsewhere are reached through the directory.

const SEND_ATTEMPTS: u32 = 3;

pub struct HttpSignaling {
    /// participant id -> host:port of the server they subscribe at
    directory: HashMap<ParticipantId, String>,
    /// envelopes received by this process's server
    hub: Arc<LoopbackSignaling>,
    client: Client<HttpConnector>,
}

impl HttpSignaling {
    pub fn new(hub: Arc<LoopbackSignaling>, directory: HashMap<ParticipantId, String>) -> Self {
        Self {
            directory,
            hub,
            client: Client::builder().build(HttpConnector::new()),
        }
    }

    async fn post(&self, remote_host: &str, payload: String) -> Result<()> {
        let req = match Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/signal", remote_host))
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::from(payload))
        {
            Ok(req) => req,
            Err(err) => {
                log::error!("failed to create request : {}", err);
                return Err(err.into());
            }
        };
        let response = self.client.request(req).await?;
        if !response.status().is_success() {
            bail!("signaling server returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for HttpSignaling {
    async fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        let Some(remote_host) = self.directory.get(&envelope.to) else {
            return self.hub.send(envelope).await;
        };
        let payload = serde_json::to_string(&envelope)?;

        let mut attempt = 1;
        loop {
            match self.post(remote_host, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SEND_ATTEMPTS => {
                    log::warn!(
                        "failed to send signal to {} (attempt {}): {}",
                        remote_host,
                        attempt,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("failed to send signaling parameters: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn subscribe(
        &self,
        participant: &ParticipantId,
    ) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>> {
        self.hub.subscribe(participant).await
    }
}

/// binds the server and runs it in the background. use port 0 to pick any port
pub async fn spawn_signaling_server(
    addr: &str,
    hub: Arc<LoopbackSignaling>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let addr = SocketAddr::from_str(addr)?;
    let service = make_service_fn(move |_| {
        let hub = hub.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| remote_handler(req, hub.clone())))
        }
    });
    let server = hyper::Server::try_bind(&addr)?.serve(service);
    let local_addr = server.local_addr();
    log::info!("signaling server listening on {}", local_addr);
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("server error: {}", e);
        }
    });
    Ok((local_addr, handle))
}

pub async fn signaling_server(addr: &str, hub: Arc<LoopbackSignaling>) -> Result<()> {
    let (_, handle) = spawn_signaling_server(addr, hub).await?;
    // Run this server for... forever!
    handle.await?;
    Ok(())
}

async fn remote_handler(
    req: Request<Body>,
    hub: Arc<LoopbackSignaling>,
) -> Result<Response<Body>, hyper::Error> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/signal") => {
            let body = hyper::body::to_bytes(req.into_body()).await?;
            let envelope = match serde_json::from_slice::<SignalEnvelope>(&body) {
                Ok(s) => s,
                Err(err) => {
                    log::error!("deserialize error: {}", err);
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    return Ok(response);
                }
            };
            if let Err(e) = hub.send(envelope).await {
                log::error!("failed to deliver signal: {}", e);
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            }
            Ok(response)
        }
        // Return the 404 Not Found for other routes.
        _ => {
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}
