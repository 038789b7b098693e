//! The multiplex channel: one control connection carrying all session
//! traffic for one console, demultiplexed by session identifier.

pub mod outbound;
pub mod router;
pub mod ws;

pub use outbound::FrameSender;
pub use router::{ChannelRouter, ChannelSettings};
pub use ws::ChannelListener;
