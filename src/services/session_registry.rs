// Session Registry Service
// Process-wide set of active video sessions; every UID a session holds is unique

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::services::relay_context::RelayContext;
use crate::services::video_session::{
    SessionRequest, SessionRequestError, SessionSnapshot, VideoSession,
};

pub type SharedSession = Arc<Mutex<VideoSession>>;

struct RegistryEntry {
    primary_uid: String,
    linked_uid: String,
    /// Primary, source, virtual and linked UIDs
    claims: Vec<String>,
    session: SharedSession,
}

impl RegistryEntry {
    fn matches(&self, uid: &str) -> bool {
        self.primary_uid == uid || self.linked_uid == uid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    InvalidRequest(#[from] SessionRequestError),

    #[error("UID '{0}' is already registered")]
    UidTaken(String),
}

/// Result of an unregister request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    /// No session accepts the supplied credentials
    NotFound,
    /// Session dropped from the registry, but MediaMTX kept at least one path
    PathsRemain(u16),
}

/// Owns every live [`VideoSession`]. One lock guards the collection; each
/// session has its own lock so slow MediaMTX calls never block the registry.
/// UIDs of sessions still being provisioned are held in `reserved`.
///
/// Lock order: `entries`, then `reserved`.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
    reserved: Mutex<HashSet<String>>,
}

fn first_taken(
    claims: &[String],
    entries: &[RegistryEntry],
    reserved: &HashSet<String>,
) -> Option<String> {
    claims
        .iter()
        .find(|uid| reserved.contains(*uid) || entries.iter().any(|e| e.claims.contains(*uid)))
        .cloned()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the request, reserve every UID it claims, then provision the
    /// session. Nothing reaches MediaMTX when a UID is malformed or taken.
    pub async fn register(
        &self,
        request: SessionRequest,
        relay: &RelayContext,
    ) -> Result<SharedSession, RegisterError> {
        let request = request.resolve_ids()?;
        let claims = request.claimed_uids();
        {
            let entries = self.entries.lock().await;
            let mut reserved = self.reserved.lock().await;
            if let Some(uid) = first_taken(&claims, &entries, &reserved) {
                log::warn!("Rejected registration: UID {uid} already registered");
                return Err(RegisterError::UidTaken(uid));
            }
            reserved.extend(claims.iter().cloned());
        }

        let session = VideoSession::create(request, relay).await;

        let mut entries = self.entries.lock().await;
        self.reserved
            .lock()
            .await
            .retain(|uid| !claims.contains(uid));
        Ok(Self::insert(&mut entries, session))
    }

    /// Store an already provisioned `session` unless any UID it holds is taken.
    /// A rejected session is handed back; only paths it created are its to unwind.
    pub async fn add(&self, session: VideoSession) -> Result<SharedSession, VideoSession> {
        let claims = session.claimed_uids();

        let mut entries = self.entries.lock().await;
        let taken = first_taken(&claims, &entries, &*self.reserved.lock().await);
        if let Some(uid) = taken {
            log::warn!("Rejected session {}: UID {uid} already registered", session.uid());
            return Err(session);
        }
        Ok(Self::insert(&mut entries, session))
    }

    fn insert(entries: &mut Vec<RegistryEntry>, session: VideoSession) -> SharedSession {
        let primary_uid = session.uid().to_string();
        let entry = RegistryEntry {
            primary_uid: primary_uid.clone(),
            linked_uid: session.linked_device().to_string(),
            claims: session.claimed_uids(),
            session: Arc::new(Mutex::new(session)),
        };
        let shared = entry.session.clone();
        entries.push(entry);
        log::info!("Registered session {primary_uid} ({} active)", entries.len());
        shared
    }

    /// Lookup by primary or linked UID
    pub async fn find_by_uid(&self, uid: &str) -> Option<SharedSession> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|entry| entry.matches(uid))
            .map(|entry| entry.session.clone())
    }

    /// First session whose credentials accept `(uid, otp)`
    pub async fn find_by_uid_and_otp(&self, uid: &str, otp: &str) -> Option<SharedSession> {
        let sessions = self.all().await;
        for session in sessions {
            if session.lock().await.valid_credentials(otp, uid) {
                return Some(session);
            }
        }
        None
    }

    /// Drop the session registered under `uid` (primary or linked). Paths are left alone.
    pub async fn remove_by_uid(&self, uid: &str) -> Option<SharedSession> {
        let mut entries = self.entries.lock().await;
        let index = entries.iter().position(|entry| entry.matches(uid))?;
        let entry = entries.remove(index);
        log::info!("Removed session {} ({} active)", entry.primary_uid, entries.len());
        Some(entry.session)
    }

    async fn remove_shared(&self, session: &SharedSession) {
        self.entries
            .lock()
            .await
            .retain(|entry| !Arc::ptr_eq(&entry.session, session));
    }

    /// Authenticate, stop injection, delete both paths and forget the session
    pub async fn unregister(&self, uid: &str, otp: &str) -> UnregisterOutcome {
        let Some(shared) = self.find_by_uid_and_otp(uid, otp).await else {
            log::warn!("Unregister refused for {uid}: no matching credentials");
            return UnregisterOutcome::NotFound;
        };

        let status = {
            let mut session = shared.lock().await;
            let injection = session.stop_injection().await;
            if !(200..300).contains(&injection) {
                log::debug!("Stop injection for {} answered {injection}", session.uid());
            }
            session.remove_all_paths().await
        };
        self.remove_shared(&shared).await;
        log::info!("Unregistered session via {uid}");

        if status == 200 {
            UnregisterOutcome::Removed
        } else {
            UnregisterOutcome::PathsRemain(status)
        }
    }

    /// Remove every session and its paths; returns how many were torn down
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<RegistryEntry> = self.entries.lock().await.drain(..).collect();
        for entry in &drained {
            let mut session = entry.session.lock().await;
            let status = session.remove_all_paths().await;
            if status != 200 {
                log::warn!("Session {} left paths behind on shutdown ({status})", entry.primary_uid);
            }
        }
        drained.len()
    }

    async fn all(&self) -> Vec<SharedSession> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for session in self.all().await {
            snapshots.push(session.lock().await.snapshot());
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
