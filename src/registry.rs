use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Identifies an attached client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form, we only need it to tell clients apart in logs.
        let id = self.0.to_string();
        write!(f, "{}", &id[..8])
    }
}

/// Where lines destined for one client are put.
pub type ClientChannel = mpsc::Sender<String>;

/// The clients currently attached, and the means to reach them.
///
/// The registry does not own any transport.
/// It holds the sending side of a bounded queue per client,
/// and whoever attached the client drains the other side.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    clients: Arc<Mutex<HashMap<ClientId, ClientChannel>>>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// A registry where [`ConnectionRegistry::attach`] gives out queues
    /// holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientChannel>> {
        // The map is never left half-updated, poisoning is fine to ignore.
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start broadcasting to the given channel.
    pub fn register(&self, channel: ClientChannel) -> ClientId {
        let id = ClientId::new();
        self.clients().insert(id, channel);

        debug!(%id, "Client registered");
        id
    }

    /// Create a bounded queue, register its sending side,
    /// and return the receiving side.
    pub fn attach(&self) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.capacity);

        (self.register(tx), rx)
    }

    /// Stop broadcasting to the given client.
    /// Does nothing if the client is not registered.
    pub fn unregister(&self, id: ClientId) {
        if self.clients().remove(&id).is_some() {
            debug!(%id, "Client unregistered");
        }
    }

    /// Put the payload in every client's queue.
    ///
    /// Never waits. Clients whose queue is closed or full are unregistered.
    pub fn broadcast(&self, payload: &str) {
        let mut clients = self.clients();
        let mut gone = vec![];

        for (id, channel) in clients.iter() {
            match channel.try_send(payload.to_owned()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%id, "Client is not keeping up, dropping it");
                    gone.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%id, "Client went away");
                    gone.push(*id);
                }
            }
        }

        for id in &gone {
            clients.remove(id);
        }

        trace!(
            "Broadcasted message to {} client(s), dropped {}",
            clients.len(),
            gone.len()
        );
    }

    /// How many clients are registered.
    pub fn len(&self) -> usize {
        self.clients().len()
    }

    /// True if no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    /// Is the given client registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients().contains_key(&id)
    }
}
