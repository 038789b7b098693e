//! # Fleetmux Server Library
//!
//! The server side of the Fleetmux remote-shell multiplexer: it accepts one
//! control connection per console and opens, supervises, and relays N
//! independent SSH sessions on it, each bound to its own target host,
//! credential, and key.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Control Connection                        │
//! │                  (WebSocket, JSON frames)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                   Channel Router                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │        │                    │                    │            │
//! │  ┌───────────┐       ┌───────────┐        ┌───────────┐      │
//! │  │  Session  │       │  Session  │  ...   │  Session  │      │
//! │  │  (SSH)    │       │  (SSH)    │        │  (SSH)    │      │
//! │  └───────────┘       └───────────┘        └───────────┘      │
//! │        └──────── Session Registry ─────────────┘             │
//! ├──────────────────────────────────────────────────────────────┤
//! │       Target Inventory (file / HTTP, external service)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Destroying a channel closes every session it owns; a failure in one
//! session never disturbs its siblings.
//!
//! ## Modules
//!
//! - [`channel`]: control connection, routing, outbound frame queue
//! - [`session`]: remote-session state machine, SSH transport, registry
//! - [`inventory`]: target resolver interface and backends
//! - [`config`]: TOML configuration

pub mod channel;
pub mod config;
pub mod inventory;
pub mod session;

pub use config::Config;
