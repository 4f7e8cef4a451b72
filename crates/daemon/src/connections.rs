// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The connection registry: who is connected, under which object id, and
//! how to reach their socket. Implements the kernel's `Session` trait, so
//! `notify()` and friends land here.

use corral_kernel::{Session, SessionError};
use corral_var::Obj;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// A line (or control message) on its way out to a socket.
#[derive(Debug)]
pub enum ConnectionOut {
    /// Text plus whether to flush the network buffer afterwards.
    Line(String, bool),
    Disconnect,
}

pub struct ConnectionHandle {
    pub outbound: UnboundedSender<ConnectionOut>,
    pub peer_addr: String,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub ever_logged_in: bool,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Obj, ConnectionHandle>,
    // Unlogged connections count down from -2, the ids LambdaMOO cores
    // expect to see before login.
    next_connection_id: i64,
    listeners: Vec<(Obj, u16)>,
}

pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_connection_id: -2,
                ..Default::default()
            }),
        }
    }

    pub fn add_listener(&self, obj: Obj, port: u16) {
        self.inner.lock().unwrap().listeners.push((obj, port));
    }

    /// Register a fresh, unlogged connection. Returns its negative id.
    pub fn register(
        &self,
        outbound: UnboundedSender<ConnectionOut>,
        peer_addr: String,
    ) -> Obj {
        let mut inner = self.inner.lock().unwrap();
        let id = Obj::mk_id(inner.next_connection_id);
        inner.next_connection_id -= 1;
        inner.connections.insert(
            id,
            ConnectionHandle {
                outbound,
                peer_addr,
                connected_at: Instant::now(),
                last_activity: Instant::now(),
                ever_logged_in: false,
            },
        );
        id
    }

    /// Re-key a connection from its unlogged id to the player that logged
    /// in. Returns the handle of any *prior* connection for that player,
    /// which the caller boots.
    pub fn login(&self, connection: Obj, player: Obj) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut handle) = inner.connections.remove(&connection) else {
            warn!("login for unknown connection {connection}");
            return None;
        };
        handle.ever_logged_in = true;
        handle.connected_at = Instant::now();
        let prior = inner.connections.remove(&player);
        inner.connections.insert(player, handle);
        prior
    }

    pub fn remove(&self, who: Obj) -> Option<ConnectionHandle> {
        self.inner.lock().unwrap().connections.remove(&who)
    }

    pub fn touch_activity(&self, who: Obj) {
        if let Some(handle) = self.inner.lock().unwrap().connections.get_mut(&who) {
            handle.last_activity = Instant::now();
        }
    }

    pub fn ever_logged_in(&self, who: Obj) -> bool {
        self.inner
            .lock()
            .unwrap()
            .connections
            .get(&who)
            .map(|h| h.ever_logged_in)
            .unwrap_or(false)
    }

    fn send(&self, who: Obj, out: ConnectionOut) -> Result<(), SessionError> {
        let inner = self.inner.lock().unwrap();
        let Some(handle) = inner.connections.get(&who) else {
            return Err(SessionError::NoConnectionForPlayer(who));
        };
        handle
            .outbound
            .send(out)
            .map_err(|_| SessionError::DeliveryError)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for ConnectionRegistry {
    fn notify(&self, player: Obj, line: &str, no_flush: bool) -> Result<(), SessionError> {
        self.send(player, ConnectionOut::Line(line.to_string(), !no_flush))
    }

    fn send_system_msg(&self, player: Obj, msg: &str) -> Result<(), SessionError> {
        self.send(player, ConnectionOut::Line(msg.to_string(), true))
    }

    fn connection_name(&self, player: Obj) -> Result<String, SessionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(&player)
            .map(|h| h.peer_addr.clone())
            .ok_or(SessionError::NoConnectionForPlayer(player))
    }

    fn connected_players(&self, include_all: bool) -> Result<Vec<Obj>, SessionError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .connections
            .keys()
            .filter(|o| include_all || o.is_positive())
            .copied()
            .collect())
    }

    fn connected_seconds(&self, player: Obj) -> Result<f64, SessionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(&player)
            .map(|h| h.connected_at.elapsed().as_secs_f64())
            .ok_or(SessionError::NoConnectionForPlayer(player))
    }

    fn idle_seconds(&self, player: Obj) -> Result<f64, SessionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(&player)
            .map(|h| h.last_activity.elapsed().as_secs_f64())
            .ok_or(SessionError::NoConnectionForPlayer(player))
    }

    fn boot_player(&self, player: Obj) -> Result<(), SessionError> {
        self.send(player, ConnectionOut::Disconnect)
    }

    fn listeners(&self) -> Vec<(Obj, u16)> {
        self.inner.lock().unwrap().listeners.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_descend_from_minus_two() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let a = registry.register(tx.clone(), "a".into());
        let b = registry.register(tx, "b".into());
        assert_eq!(a, Obj::mk_id(-2));
        assert_eq!(b, Obj::mk_id(-3));
    }

    #[test]
    fn test_login_rekeys_and_reports_prior() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = registry.register(tx.clone(), "first".into());
        let player = Obj::mk_id(2);
        assert!(registry.login(conn, player).is_none());

        // A second login to the same player reports the prior handle.
        let conn2 = registry.register(tx, "second".into());
        let prior = registry.login(conn2, player);
        assert!(prior.is_some());
        assert_eq!(prior.unwrap().peer_addr, "first");
    }

    #[test]
    fn test_connected_players_excludes_unlogged() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = registry.register(tx.clone(), "a".into());
        let _conn2 = registry.register(tx, "b".into());
        registry.login(conn, Obj::mk_id(2));
        assert_eq!(
            registry.connected_players(false).unwrap(),
            vec![Obj::mk_id(2)]
        );
        assert_eq!(registry.connected_players(true).unwrap().len(), 2);
    }
}
