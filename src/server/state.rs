use axum::extract::FromRef;
use std::sync::Arc;

use super::session::SessionAuthenticator;
use crate::audit::AuditLogger;
use crate::providers::VisionClient;
use crate::queue::JobQueue;
use crate::settings::SettingsStore;
use crate::smart_upload::{ProgressBus, SessionStore};
use crate::storage::ObjectStore;

pub type GuardedSettingsStore = Arc<dyn SettingsStore>;
pub type GuardedSessionStore = Arc<dyn SessionStore>;
pub type GuardedObjectStore = Arc<dyn ObjectStore>;
pub type GuardedVisionClient = Arc<dyn VisionClient>;
pub type GuardedJobQueue = Arc<JobQueue>;
pub type GuardedAuditLogger = Arc<AuditLogger>;
pub type GuardedAuthenticator = Arc<dyn SessionAuthenticator>;

#[derive(Clone)]
pub struct ServerState {
    pub settings_store: GuardedSettingsStore,
    pub session_store: GuardedSessionStore,
    pub object_store: GuardedObjectStore,
    pub vision: GuardedVisionClient,
    pub job_queue: GuardedJobQueue,
    pub audit: GuardedAuditLogger,
    pub authenticator: GuardedAuthenticator,
    pub progress: ProgressBus,
}

impl FromRef<ServerState> for GuardedSettingsStore {
    fn from_ref(input: &ServerState) -> Self {
        input.settings_store.clone()
    }
}

impl FromRef<ServerState> for GuardedSessionStore {
    fn from_ref(input: &ServerState) -> Self {
        input.session_store.clone()
    }
}

impl FromRef<ServerState> for GuardedObjectStore {
    fn from_ref(input: &ServerState) -> Self {
        input.object_store.clone()
    }
}

impl FromRef<ServerState> for GuardedVisionClient {
    fn from_ref(input: &ServerState) -> Self {
        input.vision.clone()
    }
}

impl FromRef<ServerState> for GuardedJobQueue {
    fn from_ref(input: &ServerState) -> Self {
        input.job_queue.clone()
    }
}

impl FromRef<ServerState> for GuardedAuditLogger {
    fn from_ref(input: &ServerState) -> Self {
        input.audit.clone()
    }
}

impl FromRef<ServerState> for GuardedAuthenticator {
    fn from_ref(input: &ServerState) -> Self {
        input.authenticator.clone()
    }
}

impl FromRef<ServerState> for ProgressBus {
    fn from_ref(input: &ServerState) -> Self {
        input.progress.clone()
    }
}
