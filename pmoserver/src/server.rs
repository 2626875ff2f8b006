//! # Server module - high level API over Axum
//!
//! Thin wrapper around an axum [`Router`] that is assembled piece by piece
//! (`add_router`, `add_handler`) and then served on the configured address
//! until Ctrl+C.

use axum::handler::Handler;
use axum::routing::get;
use axum::Router;
use pmoconfig::get_config;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tracing::{error, info};

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub bind_address: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    bind_address: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Creates a server that will listen on `bind_address:http_port`
    pub fn new(name: impl Into<String>, bind_address: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_address: bind_address.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
        }
    }

    pub fn new_configured() -> Self {
        ServerBuilder::new_configured().build()
    }

    /// Ajoute un handler GET sans état
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()> + Clone + 'static,
        T: 'static,
    {
        let route = Router::new().route("/", get(handler));
        self.add_router(path, route).await;
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;

        *r = if path == "/" {
            std::mem::take(&mut *r).merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, sub_router)
        };
    }

    /// Snapshot of the router assembled so far
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Binds the listener and starts serving in the background
    ///
    /// Binding happens before this returns, so an address already in use is
    /// reported to the caller. Ctrl+C stops the server.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let ip = self
            .bind_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", self.bind_address, e))?;
        let addr = SocketAddr::new(ip, self.http_port);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

        info!(
            "Server {} running at http://{}:{}",
            self.name, self.bind_address, self.http_port
        );

        let router = self.router().await;
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service()).await {
                error!("Server error: {}", e);
            }
        });

        let shutdown_task = tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = server_task => {},
                _ = shutdown_task => {},
            }
        }));

        Ok(())
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            bind_address: self.bind_address.clone(),
            http_port: self.http_port,
        }
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    bind_address: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, bind_address: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_address: bind_address.into(),
            http_port,
        }
    }

    /// Builder initialised from the `host` section of the configuration
    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: "PMOSiriusXM".to_string(),
            bind_address: config.get_bind_address(),
            http_port: config.get_http_port(),
        }
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.bind_address, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn body_of(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_routers_are_merged_and_nested() {
        let mut server = ServerBuilder::new("test", "127.0.0.1", 0).build();
        server.add_handler("/ping", || async { "pong" }).await;
        server
            .add_router("/", Router::new().route("/root", get(|| async { "root" })))
            .await;

        assert_eq!(body_of(server.router().await, "/ping").await, (StatusCode::OK, "pong".into()));
        assert_eq!(body_of(server.router().await, "/root").await, (StatusCode::OK, "root".into()));
        assert_eq!(body_of(server.router().await, "/nope").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_bind_address_is_an_error() {
        let mut server = ServerBuilder::new("test", "not-an-ip", 0).build();
        assert!(server.start().await.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let server = ServerBuilder::new("test", "127.0.0.1", 1)
            .http_port(8080)
            .bind_address("0.0.0.0")
            .build();
        let info = server.info();
        assert_eq!(info.http_port, 8080);
        assert_eq!(info.bind_address, "0.0.0.0");
    }
}
