//! WebSocket connection tracking and management.
//!
//! This module provides tracking of WebSocket connections with force-close
//! capability and directed delivery:
//!
//! - `WsConnectionManager`: tracks all active connections
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect
//!
//! Directed delivery exists for the arbitration events (`admin-rejected`,
//! `takeover-warning`, `force-disconnect`) and query replies, which go to one
//! connection instead of the broadcast fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::ServerEvent;

/// Per-connection state: the directed-send channel and the close handle.
struct ConnectionState {
    sender: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe and designed for concurrent access from multiple WebSocket
/// handlers. Uses hierarchical cancellation tokens for efficient force-close
/// of individual connections or all of them.
pub struct WsConnectionManager {
    /// Active connections: connection_id -> ConnectionState
    connections: DashMap<String, ConnectionState>,
    /// Counter for generating unique connection IDs.
    next_id: AtomicU64,
    /// Global cancellation token - when cancelled, all connections close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    /// Creates a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns a guard for RAII cleanup.
    ///
    /// `sender` is the connection's directed-delivery channel; its handler
    /// forwards received events to the socket.
    pub fn register(
        self: &Arc<Self>,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            conn_id.clone(),
            ConnectionState {
                sender,
                cancel: cancel_token.clone(),
            },
        );
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    /// Unregisters a connection by ID.
    fn unregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    /// Delivers an event to one specific connection.
    ///
    /// Returns `false` when the connection is gone (already closed).
    pub fn send_to(&self, conn_id: &str, event: ServerEvent) -> bool {
        match self.connections.get(conn_id) {
            Some(state) => state.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Force-closes one connection.
    pub fn close_connection(&self, conn_id: &str) {
        if let Some(state) = self.connections.get(conn_id) {
            log::info!("[WS] Force-closing connection {}", conn_id);
            state.cancel.cancel();
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections.
    ///
    /// This cancels the global token, which signals all connection handlers
    /// to terminate gracefully. After cancellation, a fresh token is created
    /// so new connections can still be accepted.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
///
/// This ensures connections are always cleaned up, even if the handler
/// panics or exits early.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    /// Token for this specific connection - cancelled on force-close.
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// Returns the connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cancellation token for this connection.
    ///
    /// Use this in `tokio::select!` to detect force-close requests.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
