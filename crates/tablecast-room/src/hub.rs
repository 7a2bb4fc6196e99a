//! The hub: connection registry and room index behind one lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tablecast_transport::ConnectionId;
use tokio::sync::{Mutex, mpsc, watch};

use crate::RoomSubscriptions;

/// Channel sender for delivering text frames to one connection.
///
/// The connection's writer task owns the receiving half and forwards each
/// frame to the socket. Once that task is gone the sender reports closed,
/// which is how the hub tells a ready connection from a dying one.
pub type Outbound = mpsc::UnboundedSender<Arc<str>>;

/// A read-only snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Rooms the connection is a member of.
    pub rooms: BTreeSet<String>,
    /// Subject id attached by a successful `auth`, if any.
    pub subject_id: Option<String>,
    /// Whether the connection's writer is still accepting frames.
    pub open: bool,
}

struct ConnectionEntry {
    outbound: Outbound,
    rooms: HashSet<String>,
    subject_id: Option<String>,
}

/// Where a room is in its life cycle.
///
/// Broker round trips happen with the hub lock released. While one is in
/// flight the room sits in `Subscribing` or `Unsubscribing`; the receiver
/// fires (its sender is dropped) once the transition is settled, and
/// anyone who wants to join waits for that and looks again.
enum Phase {
    /// SUBSCRIBE in flight. No members yet.
    Subscribing(watch::Receiver<()>),
    /// Subscribed and serving members.
    Active,
    /// Emptied; UNSUBSCRIBE in flight. The entry goes away afterwards.
    Unsubscribing(watch::Receiver<()>),
}

struct RoomEntry {
    members: HashSet<ConnectionId>,
    phase: Phase,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Room name → entry. Active rooms always have at least one member.
    rooms: HashMap<String, RoomEntry>,
}

/// What `join_room` found under the lock.
enum JoinStep {
    Done(bool),
    Wait(watch::Receiver<()>),
    Create(watch::Sender<()>),
}

/// Every live connection on this process and the rooms they are in.
///
/// One `Hub` exists per server process. Connection handler tasks and the
/// broker bridge share it through an `Arc`; all state sits behind a single
/// async mutex that is only ever held for in-memory bookkeeping. Broker
/// subscription changes run with the lock released, so a slow broker
/// delays only joins and leaves of the room concerned, never delivery
/// or other rooms.
///
/// A room is subscribed before its first member is admitted and
/// unsubscribed only after its last member left; a room being created or
/// torn down is invisible to [`room_names`](Self::room_names) and to
/// delivery.
///
/// Operating on an unknown (already removed) connection is always a silent
/// no-op: frames routinely race with disconnects.
pub struct Hub<S: RoomSubscriptions> {
    state: Mutex<HubState>,
    subscriptions: Arc<S>,
    next_id: AtomicU64,
}

impl<S: RoomSubscriptions> Hub<S> {
    /// Creates an empty hub that drives `subscriptions` as rooms come and
    /// go.
    pub fn new(subscriptions: Arc<S>) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            subscriptions,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the subscription driver this hub was built with.
    pub fn subscriptions(&self) -> &Arc<S> {
        &self.subscriptions
    }

    // -----------------------------------------------------------------
    // Connection registry
    // -----------------------------------------------------------------

    /// Registers a new connection with no rooms and no identity.
    pub async fn admit(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.lock().await.connections.insert(
            id,
            ConnectionEntry {
                outbound,
                rooms: HashSet::new(),
                subject_id: None,
            },
        );
        tracing::debug!(%id, "connection admitted");
        id
    }

    /// Returns a snapshot of the connection, or `None` if it is unknown.
    pub async fn lookup(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let state = self.state.lock().await;
        state.connections.get(&id).map(|entry| ConnectionInfo {
            id,
            rooms: entry.rooms.iter().cloned().collect(),
            subject_id: entry.subject_id.clone(),
            open: !entry.outbound.is_closed(),
        })
    }

    /// Attaches (or replaces) the authenticated subject of a connection.
    ///
    /// Returns `false` if the connection is unknown.
    pub async fn attach_identity(&self, id: ConnectionId, subject_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.connections.get_mut(&id) {
            Some(entry) => {
                entry.subject_id = Some(subject_id.to_string());
                true
            }
            None => {
                tracing::debug!(%id, "identity for unknown connection ignored");
                false
            }
        }
    }

    /// Removes a connection, leaving every room it is in first.
    ///
    /// Returns `false` if the connection was already gone, so a second
    /// call changes nothing.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let teardowns = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(entry) = state.connections.remove(&id) else {
                return false;
            };
            let mut teardowns = Vec::new();
            for room in entry.rooms {
                if let Some(done) = release_member(state, id, &room) {
                    teardowns.push((room, done));
                }
            }
            teardowns
        };

        tracing::debug!(%id, emptied = teardowns.len(), "connection removed");
        for (room, done) in teardowns {
            self.finish_teardown(&room, done).await;
        }
        true
    }

    // -----------------------------------------------------------------
    // Room index
    // -----------------------------------------------------------------

    /// Adds the connection to `room`, creating and subscribing the room if
    /// it has no members yet.
    ///
    /// The broker subscription is confirmed before the connection becomes
    /// a member, so by the time anything can be delivered into the room
    /// the channel is already being listened to. If the subscription
    /// fails, the room is not created and the error is returned.
    /// Returns `Ok(false)` if the connection is unknown.
    pub async fn join_room(&self, id: ConnectionId, room: &str) -> Result<bool, S::Error> {
        loop {
            let step = {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                match state.connections.get_mut(&id) {
                    None => JoinStep::Done(false),
                    Some(connection) => match state.rooms.get_mut(room) {
                        Some(entry) => match &entry.phase {
                            Phase::Active => {
                                entry.members.insert(id);
                                connection.rooms.insert(room.to_string());
                                JoinStep::Done(true)
                            }
                            Phase::Subscribing(settled) | Phase::Unsubscribing(settled) => {
                                JoinStep::Wait(settled.clone())
                            }
                        },
                        None => {
                            let (done, settled) = watch::channel(());
                            state.rooms.insert(
                                room.to_string(),
                                RoomEntry {
                                    members: HashSet::new(),
                                    phase: Phase::Subscribing(settled),
                                },
                            );
                            JoinStep::Create(done)
                        }
                    },
                }
            };

            match step {
                JoinStep::Done(joined) => {
                    if !joined {
                        tracing::debug!(%id, room, "join for unknown connection ignored");
                    }
                    return Ok(joined);
                }
                JoinStep::Wait(mut settled) => {
                    // Errs once the sender is dropped, which is the signal.
                    let _ = settled.changed().await;
                }
                JoinStep::Create(done) => return self.create_room(id, room, done).await,
            }
        }
    }

    /// Removes the connection from `room`. Deletes and unsubscribes the
    /// room when it was the last member. Missing memberships are fine.
    pub async fn leave_room(&self, id: ConnectionId, room: &str) {
        let teardown = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if let Some(connection) = state.connections.get_mut(&id) {
                connection.rooms.remove(room);
            }
            release_member(state, id, room)
        };
        if let Some(done) = teardown {
            self.finish_teardown(room, done).await;
        }
    }

    /// Writes `text` to every open member of `room` and returns how many
    /// connections it was handed to. Closed connections are skipped; their
    /// own handler will remove them.
    pub async fn deliver_local(&self, room: &str, text: &str) -> usize {
        let state = self.state.lock().await;
        let Some(entry) = state.rooms.get(room) else {
            tracing::trace!(room, "no local members, nothing delivered");
            return 0;
        };

        let frame: Arc<str> = Arc::from(text);
        let mut delivered = 0;
        for id in &entry.members {
            let Some(connection) = state.connections.get(id) else {
                continue;
            };
            if connection.outbound.send(Arc::clone(&frame)).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(room, delivered, "delivered locally");
        delivered
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Names of every active room, sorted.
    pub async fn room_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .rooms
            .iter()
            .filter(|(_, entry)| matches!(entry.phase, Phase::Active))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Members of `room`, sorted. Empty if the room does not exist.
    pub async fn members(&self, room: &str) -> Vec<ConnectionId> {
        let state = self.state.lock().await;
        let mut ids: Vec<ConnectionId> = state
            .rooms
            .get(room)
            .map(|entry| entry.members.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .rooms
            .values()
            .filter(|entry| matches!(entry.phase, Phase::Active))
            .count()
    }

    // -----------------------------------------------------------------
    // Room life cycle
    // -----------------------------------------------------------------

    /// Second half of a join that found no room: subscribe with the lock
    /// released, then commit or roll back.
    async fn create_room(
        &self,
        id: ConnectionId,
        room: &str,
        done: watch::Sender<()>,
    ) -> Result<bool, S::Error> {
        let subscribed = self.subscriptions.subscribe(room).await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Err(e) = subscribed {
            state.rooms.remove(room);
            drop(guard);
            drop(done);
            tracing::warn!(room, error = %e, "broker subscribe failed, room not created");
            return Err(e);
        }

        let Some(entry) = state.rooms.get_mut(room) else {
            return Ok(false);
        };
        match state.connections.get_mut(&id) {
            Some(connection) => {
                connection.rooms.insert(room.to_string());
                entry.members.insert(id);
                entry.phase = Phase::Active;
                drop(guard);
                drop(done);
                tracing::info!(room, "room created");
                Ok(true)
            }
            None => {
                // The joiner disconnected mid-subscribe: undo it.
                entry.phase = Phase::Unsubscribing(done.subscribe());
                drop(guard);
                self.finish_teardown(room, done).await;
                Ok(false)
            }
        }
    }

    /// Unsubscribes an emptied room, then drops its entry and wakes anyone
    /// waiting to join it.
    async fn finish_teardown(&self, room: &str, done: watch::Sender<()>) {
        if let Err(e) = self.subscriptions.unsubscribe(room).await {
            tracing::warn!(room, error = %e, "broker unsubscribe failed");
        }
        self.state.lock().await.rooms.remove(room);
        drop(done);
        tracing::info!(room, "room destroyed");
    }
}

/// Drops `id` from `room`'s members. When that empties an active room,
/// marks it as tearing down and returns the sender that settles it.
fn release_member(
    state: &mut HubState,
    id: ConnectionId,
    room: &str,
) -> Option<watch::Sender<()>> {
    let entry = state.rooms.get_mut(room)?;
    if !entry.members.remove(&id) || !entry.members.is_empty() {
        return None;
    }
    if !matches!(entry.phase, Phase::Active) {
        return None;
    }
    let (done, settled) = watch::channel(());
    entry.phase = Phase::Unsubscribing(settled);
    Some(done)
}
