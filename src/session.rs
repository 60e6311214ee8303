use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthUser, IdentityProvider, Session, SessionStore};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn { user_id: Uuid, email: Option<String> },
}

impl AuthState {
    fn from_session(session: Option<&Session>) -> Self {
        match session {
            Some(session) => AuthState::SignedIn {
                user_id: session.user.id,
                email: session.user.email.clone(),
            },
            None => AuthState::SignedOut,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }
}

/// Receives auth state changes from a [`SessionController`]. Dropping the
/// handle unsubscribes it.
#[derive(Debug)]
pub struct AuthSubscription {
    receiver: watch::Receiver<AuthState>,
}

impl AuthSubscription {
    pub fn current(&self) -> AuthState {
        self.receiver.borrow().clone()
    }

    /// True when the state changed since the last [`Self::mark_seen`].
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    pub fn mark_seen(&mut self) -> AuthState {
        self.receiver.borrow_and_update().clone()
    }

    /// Waits for the next change. Returns `None` once the controller is gone.
    #[cfg(test)]
    pub async fn changed(&mut self) -> Option<AuthState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

/// Owns the authenticated session for the lifetime of one run and tells
/// subscribers when it changes.
pub struct SessionController<P> {
    provider: P,
    store: SessionStore,
    session: Option<Session>,
    state: watch::Sender<AuthState>,
}

impl<P: IdentityProvider> SessionController<P> {
    pub fn new(provider: P, store: SessionStore) -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self {
            provider,
            store,
            session: None,
            state,
        }
    }

    /// Picks up the stored session, refreshing it when expired. A session
    /// that cannot be refreshed is discarded.
    pub async fn restore(&mut self) -> Result<()> {
        let Some(stored) = self.store.load() else {
            return Ok(());
        };

        let session = if stored.is_expired() {
            match self.provider.refresh(&stored).await {
                Ok(fresh) => {
                    self.store.save(&fresh)?;
                    fresh
                }
                Err(err) => {
                    warn!(error = %err, "stored session could not be refreshed; signing out");
                    self.store.clear()?;
                    return Ok(());
                }
            }
        } else {
            stored
        };

        self.set_session(Some(session));
        Ok(())
    }

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            receiver: self.state.subscribe(),
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.state.receiver_count()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Asks the provider who the stored access token belongs to.
    pub async fn verify_session(&self) -> Result<AuthUser> {
        let session = self.session.as_ref().ok_or(AppError::NotSignedIn)?;
        self.provider.user(&session.access_token).await
    }

    /// Identifier stamped on rows an administrator inserts.
    pub fn current_user_id(&self) -> Result<Uuid> {
        self.session
            .as_ref()
            .map(|session| session.user.id)
            .ok_or(AppError::NotSignedIn)
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<AuthUser> {
        validate_credentials(email, password)?;
        let session = self.provider.sign_in(email.trim(), password).await?;
        self.store.save(&session)?;
        let user = session.user.clone();
        self.set_session(Some(session));
        info!(user = %user.id, "signed in");
        Ok(user)
    }

    /// Registers an account without signing it in.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        validate_credentials(email, password)?;
        let user = self.provider.sign_up(email.trim(), password).await?;
        info!(user = %user.id, "account created");
        Ok(user)
    }

    /// Ends the session locally even when the provider call fails.
    pub async fn sign_out(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            self.store.clear()?;
            return Ok(());
        };

        let remote = self.provider.sign_out(&session).await;
        self.store.clear()?;
        self.set_session(None);
        info!(user = %session.user.id, "signed out");
        remote
    }

    fn set_session(&mut self, session: Option<Session>) {
        let next = AuthState::from_session(session.as_ref());
        self.session = session;
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }
    Ok(())
}
