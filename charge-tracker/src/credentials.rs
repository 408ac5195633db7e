//! Destination, credential and producer identity storage.
//!
//! The sync engine only ever reads through [`CredentialProvider`]; acquiring
//! tokens (the sign-in flow) happens elsewhere and lands here via
//! [`CredentialProvider::set_credential`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{TrackerError, TrackerResult};

/// An access token that is wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(***)")
    }
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token. Avoid storing or logging the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of the values a sync cycle needs from outside the core.
pub trait CredentialProvider: Send + Sync {
    /// The remote append target, if one has been chosen.
    fn destination_id(&self) -> Option<String>;

    /// A currently valid access credential, if any.
    fn credential(&self) -> Option<AccessToken>;

    /// Stable identity of this sampling instance, created on first use.
    fn producer_identity(&self) -> String;

    fn set_destination_id(&self, destination_id: &str) -> TrackerResult<()>;

    fn set_credential(&self, credential: AccessToken) -> TrackerResult<()>;

    /// Forget the stored credential (sign-out or troubleshooting).
    fn clear_credential(&self) -> TrackerResult<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Zeroize)]
struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    producer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

impl Preferences {
    fn destination_id(&self) -> Option<String> {
        non_empty(self.destination_id.as_deref())
    }

    fn credential(&self) -> Option<AccessToken> {
        non_empty(self.access_token.as_deref()).map(AccessToken::from)
    }

    fn producer_identity(&mut self) -> (String, bool) {
        match non_empty(self.producer_id.as_deref()) {
            Some(id) => (id, false),
            None => {
                let id = Uuid::new_v4().to_string();
                self.producer_id = Some(id.clone());
                (id, true)
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Preferences persisted as a JSON file readable only by the owner.
///
/// Every read goes back to the file, so values saved by another process
/// (a `set-token` while `run` is active) are seen on the next sync cycle.
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Open the preferences file at `path`, which need not exist yet.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> TrackerResult<Preferences> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| TrackerError::Configuration {
                message: format!("Invalid preferences file {}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(TrackerError::Configuration {
                message: format!("Cannot read {}: {e}", self.path.display()),
            }),
        }
    }

    /// Read the current file contents, logging instead of failing.
    fn current(&self) -> Option<Preferences> {
        match self.load() {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                warn!("Preferences unavailable: {}", e);
                None
            }
        }
    }

    fn lock(&self) -> TrackerResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|e| TrackerError::Configuration {
            message: format!("Failed to acquire lock: {e}"),
        })
    }

    fn persist(&self, prefs: &Preferences) -> TrackerResult<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_vec_pretty(prefs)?;
            let tmp = self.path.with_extension("json.tmp");
            fs::write(&tmp, json)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
            }
            fs::rename(&tmp, &self.path)
        };

        write().map_err(|e| TrackerError::Configuration {
            message: format!("Cannot write {}: {e}", self.path.display()),
        })
    }

    /// Apply `f` to the file's current contents and write the result back.
    fn update(&self, f: impl FnOnce(&mut Preferences)) -> TrackerResult<()> {
        let _guard = self.lock()?;
        let mut prefs = self.load()?;
        f(&mut prefs);
        let result = self.persist(&prefs);
        prefs.zeroize();
        result
    }
}

impl CredentialProvider for FileCredentialStore {
    fn destination_id(&self) -> Option<String> {
        self.current()?.destination_id()
    }

    fn credential(&self) -> Option<AccessToken> {
        let mut prefs = self.current()?;
        let credential = prefs.credential();
        prefs.zeroize();
        credential
    }

    fn producer_identity(&self) -> String {
        let loaded = self.lock().and_then(|guard| Ok((guard, self.load()?)));
        let (_guard, mut prefs) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Preferences unavailable, using an ephemeral identity: {}", e);
                return Uuid::new_v4().to_string();
            }
        };

        let (id, created) = prefs.producer_identity();
        if created {
            match self.persist(&prefs) {
                Ok(()) => info!(producer_id = %id, "Created producer identity"),
                Err(e) => warn!("Failed to persist producer identity: {}", e),
            }
        }
        prefs.zeroize();
        id
    }

    fn set_destination_id(&self, destination_id: &str) -> TrackerResult<()> {
        let destination_id = destination_id.trim().to_string();
        self.update(|p| p.destination_id = Some(destination_id))
    }

    fn set_credential(&self, credential: AccessToken) -> TrackerResult<()> {
        self.update(|p| p.access_token = Some(credential.expose().to_string()))
    }

    fn clear_credential(&self) -> TrackerResult<()> {
        self.update(|p| {
            p.access_token.zeroize();
            p.access_token = None;
        })
    }
}

/// Credentials held only in memory.
#[derive(Default)]
pub struct MemoryCredentials {
    prefs: Mutex<Preferences>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with a destination and credential already configured.
    pub fn configured(destination_id: &str, credential: &str) -> Self {
        Self {
            prefs: Mutex::new(Preferences {
                producer_id: None,
                destination_id: Some(destination_id.to_string()),
                access_token: Some(credential.to_string()),
            }),
        }
    }

    pub fn with_producer_identity(self, producer_id: &str) -> Self {
        if let Ok(mut prefs) = self.prefs.lock() {
            prefs.producer_id = Some(producer_id.to_string());
        }
        self
    }

    fn prefs(&self) -> TrackerResult<MutexGuard<'_, Preferences>> {
        self.prefs.lock().map_err(|e| TrackerError::Configuration {
            message: format!("Failed to acquire lock: {e}"),
        })
    }
}

impl CredentialProvider for MemoryCredentials {
    fn destination_id(&self) -> Option<String> {
        self.prefs().ok()?.destination_id()
    }

    fn credential(&self) -> Option<AccessToken> {
        self.prefs().ok()?.credential()
    }

    fn producer_identity(&self) -> String {
        match self.prefs() {
            Ok(mut prefs) => prefs.producer_identity().0,
            Err(_) => Uuid::new_v4().to_string(),
        }
    }

    fn set_destination_id(&self, destination_id: &str) -> TrackerResult<()> {
        self.prefs()?.destination_id = Some(destination_id.trim().to_string());
        Ok(())
    }

    fn set_credential(&self, credential: AccessToken) -> TrackerResult<()> {
        self.prefs()?.access_token = Some(credential.expose().to_string());
        Ok(())
    }

    fn clear_credential(&self) -> TrackerResult<()> {
        let mut prefs = self.prefs()?;
        prefs.access_token.zeroize();
        prefs.access_token = None;
        Ok(())
    }
}
