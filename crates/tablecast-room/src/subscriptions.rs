//! The seam between the room index and the broker.

use std::future::Future;

/// Issues broker subscription changes on behalf of the room index.
///
/// The hub calls [`subscribe`](Self::subscribe) when a room is about to be
/// created and [`unsubscribe`](Self::unsubscribe) after its last member
/// left, so a room has a broker subscription iff it has members. Calls for
/// the same room never overlap; calls for different rooms may.
///
/// Neither is awaited with the hub lock held. A failed `subscribe` means
/// the room is not created and the join fails; a failed `unsubscribe` is
/// logged and the room is deleted anyway.
pub trait RoomSubscriptions: Send + Sync + 'static {
    /// The error a subscription change can fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Subscribe to the channel named `room`.
    fn subscribe(
        &self,
        room: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Unsubscribe from the channel named `room`.
    fn unsubscribe(
        &self,
        room: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
