//! Connection registry and room index for Tablecast.
//!
//! A room is a named broadcast group: every connection inside receives
//! every event published to it. The index is strictly local to one
//! process; the broker bridge (in the `tablecast` crate) is what makes
//! rooms look the same across processes.
//!
//! # Key types
//!
//! - [`Hub`] — live connections, their rooms, and local delivery
//! - [`RoomSubscriptions`] — how the hub asks for broker (un)subscribes
//! - [`ConnectionInfo`] — read-only snapshot of one connection
//! - [`Outbound`] — the per-connection frame queue the hub writes into

mod hub;
mod subscriptions;

pub use hub::{ConnectionInfo, Hub, Outbound};
pub use subscriptions::RoomSubscriptions;
