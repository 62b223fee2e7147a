//! Session registry for HookTunnel Relay
//!
//! Owns the table mapping webhook identifiers to sessions. Lookups share a
//! read lock, `register`/`attach`/`detach` take the write lock. No operation
//! holds the lock across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use hooktunnel_shared::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tunnel::{DeliveryQueue, Link, LinkId};

/// Server-side record for one registered webhook identifier
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Client's local forwarding address; advisory only
    pub local_target: String,
    pub registered_at: DateTime<Utc>,
    /// Attached client stream, if any
    pub link: Option<Link>,
    /// Cancelled when the attached stream goes away
    pub lifecycle: Option<CancellationToken>,
}

impl Session {
    fn new(id: String, local_target: String) -> Self {
        Self {
            id,
            local_target,
            registered_at: Utc::now(),
            link: None,
            lifecycle: None,
        }
    }

    /// True when a client stream is attached and still open
    pub fn is_linked(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.is_closed())
    }
}

/// In-memory session table
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    link_counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener and return its identifier.
    ///
    /// An empty or absent `id` gets a freshly generated one. A supplied `id`
    /// is used as-is; if it is already registered the local target is
    /// overwritten and any attached link is left alone.
    pub fn register(&self, id: Option<&str>, local_target: &str) -> String {
        let mut sessions = self.write();

        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => loop {
                let candidate = generate_webhook_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        match sessions.get_mut(&id) {
            Some(existing) => {
                info!("Webhook ID {} already exists, updating local target", id);
                existing.local_target = local_target.to_string();
                existing.registered_at = Utc::now();
            }
            None => {
                sessions.insert(id.clone(), Session::new(id.clone(), local_target.to_string()));
            }
        }

        id
    }

    /// Store a client's stream on an existing session.
    ///
    /// An already attached stream is superseded: its lifecycle is cancelled
    /// so that its owner closes it.
    pub fn attach(&self, id: &str, link: Link, lifecycle: CancellationToken) -> Result<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        install(session, link, lifecycle);
        Ok(())
    }

    /// Attach a new stream and return the queue it should drain.
    ///
    /// When a live stream is superseded the new one takes over its queue, so
    /// deliveries already accepted for the session are not lost.
    pub fn attach_stream(
        &self,
        id: &str,
        link_id: LinkId,
        buffer: usize,
        lifecycle: CancellationToken,
    ) -> Result<DeliveryQueue> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let (link, queue) = match session.link.as_ref().and_then(|previous| previous.rebind(link_id)) {
            Some(taken_over) => {
                debug!("New stream for webhook ID {} takes over the pending queue", id);
                taken_over
            }
            None => Link::channel(link_id, buffer),
        };
        install(session, link, lifecycle);
        Ok(queue)
    }

    /// Remove a session entirely, cancelling its stream if attached.
    pub fn detach(&self, id: &str) -> Option<Session> {
        let removed = self.write().remove(id);
        if let Some(lifecycle) = removed.as_ref().and_then(|s| s.lifecycle.as_ref()) {
            lifecycle.cancel();
        }
        removed
    }

    /// Remove a session only if `link_id` is still its attached link.
    ///
    /// Returns false when the session is gone or a newer stream owns it.
    pub fn detach_link(&self, id: &str, link_id: LinkId) -> bool {
        let mut sessions = self.write();
        let owns_session = sessions
            .get(id)
            .and_then(|s| s.link.as_ref())
            .is_some_and(|link| link.id == link_id);
        if !owns_session {
            return false;
        }
        if let Some(lifecycle) = sessions.remove(id).and_then(|s| s.lifecycle) {
            lifecycle.cancel();
        }
        true
    }

    pub fn has_active_link(&self, id: &str) -> bool {
        self.read().get(id).is_some_and(Session::is_linked)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Allocate an identifier for the next attachment
    pub fn next_link_id(&self) -> LinkId {
        self.link_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cancel every attached stream (shutdown)
    pub fn close_all(&self) {
        for session in self.read().values() {
            if let Some(lifecycle) = &session.lifecycle {
                lifecycle.cancel();
            }
        }
    }
}

fn install(session: &mut Session, link: Link, lifecycle: CancellationToken) {
    if let Some(previous) = session.lifecycle.replace(lifecycle) {
        debug!("Superseding stream for webhook ID {}", session.id);
        previous.cancel();
    }
    session.link = Some(link);
}

fn generate_webhook_id() -> String {
    format!("webhook_{}", Uuid::new_v4().simple())
}
