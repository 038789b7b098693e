//! # Fleetmux Console Library
//!
//! The operator side of the Fleetmux remote-shell multiplexer: one control
//! connection to the server, one pane per open session, all inside a single
//! adjustable terminal view.
//!
//! ## Overview
//!
//! The console fans a launch list of targets out into one `open` request per
//! target on a single WebSocket, then demultiplexes the tagged frames coming
//! back into per-pane logs:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 Pane Grid (ui)                │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐        │
//! │  │ web-1   │  │ web-2   │  │ db-1    │  ...   │
//! │  └─────────┘  └─────────┘  └─────────┘        │
//! ├───────────────────────────────────────────────┤
//! │              View Model (app, pane)           │
//! ├───────────────────────────────────────────────┤
//! │          Control Connection (client)          │
//! │            one WebSocket, N sessions          │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A failure in one pane never blanks or disconnects the others; every pane
//! tracks its own connecting/connected/error/closed state.
//!
//! ## Modules
//!
//! - [`app`]: view model tying panes, focus, and protocol traffic together
//! - [`pane`]: per-session frame log, scrollback, and status
//! - [`ui`]: ratatui grid composition for 1..N panes
//! - [`keys`]: keyboard-to-shell byte translation
//! - [`client`]: WebSocket control client

pub mod app;
pub mod client;
pub mod keys;
pub mod pane;
pub mod ui;

pub use app::App;
