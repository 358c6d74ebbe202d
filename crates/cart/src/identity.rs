//! Identity resolution: one active identity per client context.
//!
//! A visitor is either a guest (anonymous token persisted in the local
//! profile directory) or authenticated (user id published by the auth
//! collaborator). The resolver never validates sessions itself - it only
//! consumes the auth subsystem's current state and its change signal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use zocalo_core::UserId;

/// File under the profile directory holding the guest token.
const GUEST_TOKEN_FILE: &str = "guest_token";

/// Guest tokens are 32 alphanumeric characters.
const GUEST_TOKEN_LENGTH: usize = 32;

/// Locally generated anonymous identifier for a not-yet-authenticated
/// visitor. Stable across restarts until the profile is cleared or the
/// token is retired by a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestToken(String);

impl GuestToken {
    /// Wrap an existing token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the underlying token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GuestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a random guest token.
fn generate_token() -> GuestToken {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let token: String = (0..GUEST_TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            // SAFETY: idx is always within bounds since random_range returns 0..CHARSET.len()
            char::from(*CHARSET.get(idx).expect("idx within bounds"))
        })
        .collect();
    GuestToken(token)
}

/// Durable storage for the guest token, one file per client profile.
#[derive(Debug)]
pub struct GuestTokenStore {
    path: PathBuf,
}

impl GuestTokenStore {
    /// Create a store rooted at the given profile directory.
    #[must_use]
    pub fn new(profile_dir: &Path) -> Self {
        Self {
            path: profile_dir.join(GUEST_TOKEN_FILE),
        }
    }

    /// Read the persisted token, generating and persisting a fresh one if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the profile directory cannot be read or
    /// written.
    pub fn load_or_create(&self) -> io::Result<GuestToken> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    self.rotate()
                } else {
                    Ok(GuestToken::new(trimmed))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.rotate(),
            Err(e) => Err(e),
        }
    }

    /// Generate a fresh token and persist it, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the token file cannot be written.
    pub fn rotate(&self) -> io::Result<GuestToken> {
        let token = generate_token();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token.as_str())?;
        debug!("rotated guest token");
        Ok(token)
    }
}

/// The single active identity for the current client context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Guest(GuestToken),
    Authenticated(UserId),
}

impl Identity {
    /// Cart ownership for this identity.
    #[must_use]
    pub fn owner(&self) -> crate::models::CartOwner {
        match self {
            Self::Guest(token) => crate::models::CartOwner::Guest(token.clone()),
            Self::Authenticated(user_id) => crate::models::CartOwner::User(user_id.clone()),
        }
    }
}

/// Resolves the active identity and observes authentication transitions.
///
/// Exactly one identity is active at a time; operations snapshot it once
/// at entry, so a sign-in mid-operation never changes the cart an
/// operation is already targeting.
#[derive(Debug)]
pub struct IdentityResolver {
    guest: Mutex<GuestToken>,
    store: GuestTokenStore,
    session: watch::Receiver<Option<UserId>>,
}

impl IdentityResolver {
    /// Load (or create) the guest token and attach to the auth
    /// collaborator's session signal.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the guest token cannot be read or persisted.
    pub fn new(
        profile_dir: &Path,
        session: watch::Receiver<Option<UserId>>,
    ) -> io::Result<Self> {
        let store = GuestTokenStore::new(profile_dir);
        let token = store.load_or_create()?;
        Ok(Self {
            guest: Mutex::new(token),
            store,
            session,
        })
    }

    /// The single active identity right now.
    #[must_use]
    pub fn current_identity(&self) -> Identity {
        match self.session.borrow().clone() {
            Some(user_id) => Identity::Authenticated(user_id),
            None => Identity::Guest(self.guest_token()),
        }
    }

    /// The current guest token, whether or not a session is active.
    #[must_use]
    pub fn guest_token(&self) -> GuestToken {
        self.guest
            .lock()
            .expect("guest token mutex poisoned")
            .clone()
    }

    /// Rotate the guest token after its cart has been merged. The retired
    /// token is never reused to accumulate new guest items.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the fresh token cannot be persisted.
    pub fn retire_guest_token(&self) -> io::Result<GuestToken> {
        let fresh = self.store.rotate()?;
        *self.guest.lock().expect("guest token mutex poisoned") = fresh.clone();
        Ok(fresh)
    }

    /// Stream of de-duplicated guest-to-authenticated transitions.
    #[must_use]
    pub fn sign_ins(&self) -> SignInEvents {
        SignInEvents {
            rx: self.session.clone(),
            last_seen: None,
        }
    }
}

/// De-duplicated "transitioned to authenticated" events.
///
/// The underlying session signal may republish the same login several
/// times; consumers see each distinct sign-in exactly once. A sign-out
/// resets the filter, so signing back in as the same user is a new event.
#[derive(Debug)]
pub struct SignInEvents {
    rx: watch::Receiver<Option<UserId>>,
    last_seen: Option<UserId>,
}

impl SignInEvents {
    /// Wait for the next sign-in. Returns `None` once the auth
    /// collaborator drops its end of the signal.
    pub async fn next(&mut self) -> Option<UserId> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            match current {
                Some(user_id) => {
                    if self.last_seen.as_ref() != Some(&user_id) {
                        self.last_seen = Some(user_id.clone());
                        return Some(user_id);
                    }
                }
                None => {
                    self.last_seen = None;
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_channel(
        initial: Option<UserId>,
    ) -> (
        watch::Sender<Option<UserId>>,
        watch::Receiver<Option<UserId>>,
    ) {
        watch::channel(initial)
    }

    #[test]
    fn test_generated_tokens_are_unique_and_sized() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), GUEST_TOKEN_LENGTH);
        assert!(a.as_str().chars().all(char::is_alphanumeric));
    }

    #[test]
    fn test_token_stable_across_store_restarts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = GuestTokenStore::new(dir.path())
            .load_or_create()
            .expect("create token");
        let second = GuestTokenStore::new(dir.path())
            .load_or_create()
            .expect("reload token");
        assert_eq!(first, second);
    }

    #[test]
    fn test_rotate_replaces_persisted_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = GuestTokenStore::new(dir.path());
        let first = store.load_or_create().expect("create token");
        let rotated = store.rotate().expect("rotate token");
        assert_ne!(first, rotated);
        assert_eq!(store.load_or_create().expect("reload"), rotated);
    }

    #[test]
    fn test_current_identity_follows_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = session_channel(None);
        let resolver = IdentityResolver::new(dir.path(), rx).expect("resolver");

        assert!(matches!(resolver.current_identity(), Identity::Guest(_)));

        tx.send(Some(UserId::new("u-1"))).expect("send session");
        assert_eq!(
            resolver.current_identity(),
            Identity::Authenticated(UserId::new("u-1"))
        );
    }

    #[tokio::test]
    async fn test_sign_ins_deduplicate_same_login() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = session_channel(None);
        let resolver = IdentityResolver::new(dir.path(), rx).expect("resolver");
        let mut events = resolver.sign_ins();

        tx.send(Some(UserId::new("u-1"))).expect("send");
        assert_eq!(events.next().await, Some(UserId::new("u-1")));

        // Same login republished: no new event; the next distinct login
        // is what comes out of the stream.
        tx.send(Some(UserId::new("u-1"))).expect("send");
        tx.send(Some(UserId::new("u-2"))).expect("send");
        assert_eq!(events.next().await, Some(UserId::new("u-2")));
    }

    #[tokio::test]
    async fn test_sign_out_then_in_is_a_new_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = session_channel(None);
        let resolver = IdentityResolver::new(dir.path(), rx).expect("resolver");
        let mut events = resolver.sign_ins();

        tx.send(Some(UserId::new("u-1"))).expect("send");
        assert_eq!(events.next().await, Some(UserId::new("u-1")));

        tx.send(None).expect("send");
        tx.send(Some(UserId::new("u-1"))).expect("send");
        assert_eq!(events.next().await, Some(UserId::new("u-1")));
    }

    #[tokio::test]
    async fn test_sign_ins_end_when_sender_drops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = session_channel(None);
        let resolver = IdentityResolver::new(dir.path(), rx).expect("resolver");
        let mut events = resolver.sign_ins();

        drop(tx);
        assert_eq!(events.next().await, None);
    }
}
