//! Hook Gateway
//!
//! Small HTTP server guests call back into. Every job gets a bearer token
//! at registration; `POST /notify/hook/{hook}` calls carrying that token are
//! delivered to the job's event channel and to the [`HookHandler`].

pub mod auth;
pub mod error;
pub mod handlers;

use async_trait::async_trait;
use axum::{
    Router,
    routing::{get, post},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use nix::ifaddrs::getifaddrs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use vmkite_core::domain::hook::HookEvent;

use self::auth::{TokenTable, generate_secret};
use self::error::HookError;

/// Reacts to hooks reported by guests
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle_hook(&self, hook: &str, job_id: &str) -> anyhow::Result<()>;
}

/// State shared by the gateway's request handlers
pub struct GatewayState {
    tokens: TokenTable,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<HookEvent>>>,
    handler: Arc<dyn HookHandler>,
}

impl GatewayState {
    /// Forwards an event to the job's waiter, if it is still listening
    fn publish(&self, event: HookEvent) {
        let subscribers = self.subscribers.lock();
        match subscribers.get(&event.job_id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!("Waiter of job is gone, dropping hook event");
                }
            }
            None => debug!("No waiter for job {}", event.job_id),
        }
    }
}

/// What a worker gets back when registering a job
pub struct Subscription {
    pub token: String,
    pub events: mpsc::UnboundedReceiver<HookEvent>,
}

pub struct HookGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
}

impl HookGateway {
    /// Binds the listener and starts serving in the background
    ///
    /// Without a bind address the first non-loopback local address is used
    /// with an ephemeral port. Without a secret a random one is generated.
    pub async fn listen(
        bind: Option<&str>,
        secret: Option<String>,
        handler: Arc<dyn HookHandler>,
    ) -> Result<Self, HookError> {
        let bind = match bind {
            Some(bind) => bind.to_string(),
            None => format!("{}:0", detect_local_ip().await?),
        };

        let secret = match secret {
            Some(secret) => secret,
            None => {
                info!("No hook secret configured, generating one");
                generate_secret()?
            }
        };

        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| HookError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| HookError::Bind {
            addr: bind.clone(),
            source,
        })?;

        let state = Arc::new(GatewayState {
            tokens: TokenTable::new(secret),
            subscribers: Mutex::new(HashMap::new()),
            handler,
        });

        let app = create_router(Arc::clone(&state));

        info!("Hook gateway listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Hook gateway stopped: {}", e);
                std::process::exit(1);
            }
        });

        Ok(Self { addr, state })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL guests call back to
    pub fn url(&self) -> String {
        format!("http://{}", self.addr())
    }

    /// Issues a token for the job and opens its event channel
    pub fn register_job(&self, job_id: &str) -> Result<Subscription, HookError> {
        let mut subscribers = self.state.subscribers.lock();
        if subscribers.contains_key(job_id) {
            return Err(HookError::AlreadySubscribed(job_id.to_string()));
        }

        let token = self.state.tokens.issue(job_id)?;
        let (sender, events) = mpsc::unbounded_channel();
        subscribers.insert(job_id.to_string(), sender);

        debug!("Registered job {} with the hook gateway", job_id);
        Ok(Subscription { token, events })
    }

    /// Closes the job's event channel and revokes its tokens
    pub fn release(&self, job_id: &str) {
        if self.state.subscribers.lock().remove(job_id).is_none() {
            warn!("Releasing job {} that was not registered", job_id);
        }
        self.state.tokens.revoke(job_id);
    }
}

pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route(
            "/notify/hook/{hook}",
            post(handlers::notify_hook).fallback(handlers::bad_method),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Picks the address guests call back to
///
/// The first non-loopback IPv4 address of any interface wins. Hosts whose
/// interfaces cannot be listed fall back to the address of the default route.
async fn detect_local_ip() -> Result<IpAddr, HookError> {
    match getifaddrs() {
        Ok(interfaces) => {
            let addrs = interfaces.filter_map(|interface| {
                let addr = interface.address?;
                let sin = addr.as_sockaddr_in()?;
                Some(*SocketAddrV4::from(*sin).ip())
            });
            if let Some(ip) = first_routable_ipv4(addrs) {
                return Ok(IpAddr::V4(ip));
            }
            debug!("No interface has a non-loopback IPv4 address");
        }
        Err(e) => debug!("Failed to list interface addresses: {}", e),
    }

    default_route_ip().await
}

fn first_routable_ipv4(addrs: impl IntoIterator<Item = Ipv4Addr>) -> Option<Ipv4Addr> {
    addrs
        .into_iter()
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}

/// Connecting a UDP socket sends nothing; it only selects a route.
async fn default_route_ip() -> Result<IpAddr, HookError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|_| HookError::NoLocalAddress)?;
    socket
        .connect("8.8.8.8:80")
        .await
        .map_err(|_| HookError::NoLocalAddress)?;
    let ip = socket
        .local_addr()
        .map_err(|_| HookError::NoLocalAddress)?
        .ip();

    if ip.is_loopback() || ip.is_unspecified() {
        return Err(HookError::NoLocalAddress);
    }
    Ok(ip)
}
