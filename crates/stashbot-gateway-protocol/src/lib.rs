//! Gateway protocol for Stashbot.
//!
//! A gateway connects Stashbot to a chat platform. It has three jobs:
//!
//! - **Inbound**: convert platform messages into [`InboundEvent`]s and hand them
//!   to an [`EventHandler`].
//! - **Outbound**: send and edit replies through a [`ReplySink`].
//! - **Media**: stream attachment bytes through a [`MediaSource`].
//!
//! ```text
//!  Platform ──► Gateway ──InboundEvent──► EventHandler (stashbot core)
//!                  ▲                            │
//!                  │     reply / edit           │
//!                  ├────────── ReplySink ◄──────┤
//!                  │     open(file_id)          │
//!                  └────────── MediaSource ◄────┘
//! ```
//!
//! Both outbound seams report platform flood control as a typed
//! `RateLimited` error carrying the wait the platform asked for, so the core
//! can turn it into a cool-down instead of a failure.

mod event;
mod sink;
mod source;

pub use event::{Attachment, Attachments, EventHandler, InboundEvent};
pub use sink::{MessageHandle, ReplySink, SendError};
pub use source::{ByteStream, FetchError, MediaSource};
