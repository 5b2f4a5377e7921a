//! `patrolbot-cockpit` – the operator surface.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8080`) that:
//!
//! 1. **Speaks STOMP 1.2** over WebSocket at `/ws`.  Operators subscribe to
//!    `/sub/robot/status`, `/sub/peer/offer` and `/sub/peer/candidate`, and
//!    send commands, producer switches and signaling to `/pub/...`
//!    destinations.  See [`session`] for the routing table.
//!
//! 2. **Serves** the canonical state as JSON at `GET /api/robot/latest`.
//!
//! Each WebSocket connection is one [`StompSession`] registered with the
//! [`SessionHub`][patrolbot_middleware::SessionHub]; closing the socket
//! deregisters it and drops all of its subscriptions.

pub mod server;
pub mod session;
pub mod stomp;

pub use server::{CockpitServer, DEFAULT_PORT};
pub use session::StompSession;
