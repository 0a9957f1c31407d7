//! Per-user session context: identity, role, session-local points and the
//! last resolved selection. A session lives from login to logout.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::UserConfig;
use crate::error::PipelineResult;
use crate::filter::Selection;
use crate::types::PointCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

/// Static credential table.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    users: HashMap<String, (String, Role)>,
}

impl Credentials {
    pub fn from_users(users: &[UserConfig]) -> Self {
        Self {
            users: users
                .iter()
                .map(|u| (u.name.clone(), (u.password.clone(), u.role)))
                .collect(),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> Option<Role> {
        match self.users.get(username) {
            Some((expected, role)) if expected == password => Some(*role),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub selection: Selection,
    points: Option<Arc<PointCollection>>,
}

impl Session {
    fn new(username: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            role,
            selection: Selection::default(),
            points: None,
        }
    }

    /// The session's point collection, taken from `init` on first use.
    pub fn points(&mut self, init: impl FnOnce() -> PointCollection) -> Arc<PointCollection> {
        Arc::clone(self.points.get_or_insert_with(|| Arc::new(init())))
    }

    pub fn has_points(&self) -> bool {
        self.points.is_some()
    }

    /// The collection, if one was already taken for this session.
    pub fn loaded_points(&self) -> Option<Arc<PointCollection>> {
        self.points.clone()
    }

    /// Appends a user-placed point to this session only. Returns the new
    /// number of points in the session.
    pub fn append_point(
        &mut self,
        latitude: f64,
        longitude: f64,
        init: impl FnOnce() -> PointCollection,
    ) -> PipelineResult<usize> {
        let points = self.points.get_or_insert_with(|| Arc::new(init()));
        let points = Arc::make_mut(points);
        points.append(latitude, longitude)?;
        Ok(points.len())
    }
}

/// What a client learns about its session at login.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub token: Uuid,
    pub username: String,
    pub role: Role,
}

pub struct SessionStore {
    credentials: Credentials,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a session when the credentials match the table.
    pub fn login(&self, username: &str, password: &str) -> Option<SessionInfo> {
        let Some(role) = self.credentials.verify(username, password) else {
            warn!("Rejected login for {}", username);
            return None;
        };
        let session = Session::new(username, role);
        let info = SessionInfo {
            token: session.id,
            username: session.username.clone(),
            role,
        };
        self.lock().insert(session.id, session);
        info!("{} logged in as {:?}", username, role);
        Some(info)
    }

    /// Destroys the session; `false` when the token was unknown.
    pub fn logout(&self, token: Uuid) -> bool {
        let removed = self.lock().remove(&token);
        if let Some(session) = &removed {
            info!("{} logged out", session.username);
        }
        removed.is_some()
    }

    pub fn with_session<R>(&self, token: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().get_mut(&token).map(f)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
