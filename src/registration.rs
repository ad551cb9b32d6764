//! Reconnect hooks shared by topic and service handles.
//!
//! A handle may hold several wire roles at once (a topic can be subscribed
//! and advertised). The [`Registration`] keeps the set of held roles and
//! installs one pair of hooks on the connection while that set is non-empty:
//! `connection` re-sends every held role, a manual `close` forgets them all.

use std::sync::Weak;

use bitflags::bitflags;

use crate::events::{CLOSE, CONNECTION, Event, ListenerId};
use crate::ws::ConnectionManager;

bitflags! {
    /// Wire registrations a handle currently believes active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Roles: u8 {
        const SUBSCRIBER = 1;
        const PUBLISHER = 1 << 1;
        const SERVER = 1 << 2;
    }
}

/// Implemented by handles whose registrations must survive reconnection.
pub(crate) trait Reconnectable: Send + Sync {
    /// Re-send the wire message of every held role.
    fn reregister(&self);

    /// Drop every held role without telling the bridge.
    fn forget(&self);
}

struct Hooks {
    connection: ListenerId,
    close: ListenerId,
}

pub(crate) struct Registration {
    connection: ConnectionManager,
    roles: Roles,
    hooks: Option<Hooks>,
}

impl Registration {
    pub(crate) fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            roles: Roles::empty(),
            hooks: None,
        }
    }

    pub(crate) fn roles(&self) -> Roles {
        self.roles
    }

    pub(crate) fn holds(&self, role: Roles) -> bool {
        self.roles.contains(role)
    }

    /// Take `role`, installing the hooks if it is the first one held.
    ///
    /// Returns `false` if `role` was already held.
    pub(crate) fn acquire(&mut self, role: Roles, owner: Weak<dyn Reconnectable>) -> bool {
        if self.roles.contains(role) {
            return false;
        }
        if self.roles.is_empty() {
            self.attach(owner);
        }
        self.roles.insert(role);
        true
    }

    /// Give up `role`, removing the hooks once no role is left.
    ///
    /// Returns `false` if `role` was not held.
    pub(crate) fn release(&mut self, role: Roles) -> bool {
        if !self.roles.contains(role) {
            return false;
        }
        self.roles.remove(role);
        if self.roles.is_empty() {
            self.detach();
        }
        true
    }

    /// Give up every role, returning those that were held.
    pub(crate) fn release_all(&mut self) -> Roles {
        let held = self.roles;
        self.roles = Roles::empty();
        self.detach();
        held
    }

    fn attach(&mut self, owner: Weak<dyn Reconnectable>) {
        self.detach();

        let on_connection = Weak::clone(&owner);
        let connection = self.connection.on(CONNECTION, move |_| {
            if let Some(owner) = on_connection.upgrade() {
                owner.reregister();
            }
        });
        let close = self.connection.on(CLOSE, move |event| {
            if matches!(event, Event::Close { manual: true })
                && let Some(owner) = owner.upgrade()
            {
                owner.forget();
            }
        });

        self.hooks = Some(Hooks { connection, close });
    }

    fn detach(&mut self) {
        if let Some(hooks) = self.hooks.take() {
            self.connection.off(CONNECTION, hooks.connection);
            self.connection.off(CLOSE, hooks.close);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.detach();
    }
}
