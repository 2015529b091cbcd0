//! The logged-in user, persisted as one JSON file.
//!
//! Layout: `{"version": 1, "user": {...}}`. Files written before the
//! version field existed hold the bare user object and are migrated on
//! first load.

use directories::ProjectDirs;
use portal_protocol::Identity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::info;

pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session file version {0} is newer than supported")]
    UnsupportedVersion(u64),
    #[error("session file has an unexpected shape")]
    Malformed,
    #[error("no data directory available for this platform")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_server: Option<LinkedAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<LinkedAccount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub connections: Connections,
}

impl StoredUser {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            plan: None,
            connections: Connections::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u64,
    pub user: StoredUser,
}

/// Bring any known layout up to [`SCHEMA_VERSION`]. The flag reports
/// whether the input was rewritten.
pub fn migrate(value: Value) -> Result<(PersistedState, bool), SessionError> {
    let Value::Object(mut obj) = value else {
        return Err(SessionError::Malformed);
    };
    match obj.get("version").map(Value::as_u64) {
        Some(Some(v)) if v > SCHEMA_VERSION => Err(SessionError::UnsupportedVersion(v)),
        Some(Some(_)) => Ok((serde_json::from_value(Value::Object(obj))?, false)),
        Some(None) => Err(SessionError::Malformed),
        None => {
            upgrade_v0(&mut obj);
            let user = serde_json::from_value(Value::Object(obj))?;
            Ok((
                PersistedState {
                    version: SCHEMA_VERSION,
                    user,
                },
                true,
            ))
        }
    }
}

// v0: bare user object, plan as a plain tier name, connections at top level.
fn upgrade_v0(user: &mut Map<String, Value>) {
    if let Some(Value::String(tier)) = user.remove("plan") {
        user.insert("plan".into(), serde_json::json!({ "tier": tier }));
    }
    if !user.contains_key("connections") {
        let mut connections = Map::new();
        for (old, new) in [("jellyfin", "media_server"), ("discord", "discord")] {
            if let Some(account) = user.remove(old) {
                connections.insert(new.into(), account);
            }
        }
        user.insert("connections".into(), Value::Object(connections));
    }
}

/// File-backed store for the logged-in user. Last write wins.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.json` in the platform data directory.
    pub fn default_path() -> Result<PathBuf, SessionError> {
        let proj = ProjectDirs::from("org", "portal", "portal").ok_or(SessionError::NoDataDir)?;
        Ok(proj.data_dir().join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<StoredUser>, SessionError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (state, migrated) = migrate(serde_json::from_slice(&bytes)?)?;
        if migrated {
            info!(path = %self.path.display(), "migrated session file to version {SCHEMA_VERSION}");
            self.save(&state.user).await?;
        }
        Ok(Some(state.user))
    }

    pub async fn save(&self, user: &StoredUser) -> Result<(), SessionError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let state = PersistedState {
            version: SCHEMA_VERSION,
            user: user.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&state)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Remove the stored user. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_protocol::Role;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_then_load() {
        let (_dir, store) = store();
        assert_eq!(store.load().await.unwrap(), None);
        let mut user = StoredUser::new(Identity::new("u1", "ann"));
        user.plan = Some(Plan {
            tier: "premium".into(),
            since: Some(1_700_000_000_000),
        });
        store.save(&user).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(user));

        let raw: Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], json!(1));
        assert_eq!(raw["user"]["username"], json!("ann"));
    }

    #[tokio::test]
    async fn legacy_blob_is_migrated_and_rewritten() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let legacy = json!({
            "id": "u7",
            "username": "kim",
            "role": "admin",
            "plan": "basic",
            "jellyfin": { "username": "kim-media" }
        });
        std::fs::write(store.path(), legacy.to_string()).unwrap();

        let user = store.load().await.unwrap().unwrap();
        assert_eq!(user.identity.role, Role::Admin);
        assert_eq!(user.plan.as_ref().map(|p| p.tier.as_str()), Some("basic"));
        assert_eq!(
            user.connections.media_server.as_ref().map(|a| a.username.as_str()),
            Some("kim-media")
        );

        let raw: Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], json!(1));
        assert_eq!(raw["user"]["plan"]["tier"], json!("basic"));
    }

    #[test]
    fn newer_version_is_rejected() {
        let err = migrate(json!({ "version": 2, "user": { "id": "a", "username": "b" } }))
            .unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedVersion(2)));
        assert!(matches!(migrate(json!([1, 2])), Err(SessionError::Malformed)));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (_dir, store) = store();
        store.clear().await.unwrap();
        store.save(&StoredUser::new(Identity::new("u1", "ann"))).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
