use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::UserDirectory;

use super::actor::Actor;
use super::claims::TokenClaims;
use super::role::{Role, RoleSet};

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    roles: RoleSet,
    user_name: Option<String>,
    user_id: Option<String>,
    organization: Option<String>,
    hydrated: bool,
}

/// Holds the bearer token and the identity decoded from it.
#[derive(Debug, Default)]
pub struct IdentityContext {
    session: RwLock<Session>,
}

impl IdentityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token and decode roles and identity from it.
    /// An undecodable token is still stored so requests stay authenticated.
    pub fn sign_in(&self, token: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let token = token.into();
        let claims = match TokenClaims::decode(&token) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(error = ?err, "Failed to decode token claims");
                TokenClaims::default()
            }
        };

        let roles = RoleSet::from_claims(claims.roles.iter().map(String::as_str));
        info!(
            user = claims.user_name.as_deref().unwrap_or("<unknown>"),
            role = roles.highest().map(|r| r.as_str()).unwrap_or(""),
            "Signed in"
        );

        let mut session = self.write();
        *session = Session {
            token: Some(token),
            expires_at,
            roles,
            user_name: claims.user_name,
            ..Session::default()
        };
    }

    pub fn sign_out(&self) {
        *self.write() = Session::default();
        info!("Signed out");
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.read()
            .expires_at
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    pub fn current_roles(&self) -> RoleSet {
        self.read().roles.clone()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.read().roles.has(role)
    }

    pub fn role_label(&self) -> String {
        self.read()
            .roles
            .highest()
            .map(|role| role.to_string())
            .unwrap_or_default()
    }

    pub fn current_user_name(&self) -> Option<String> {
        self.read().user_name.clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn current_organization(&self) -> Option<String> {
        self.read().organization.clone()
    }

    pub fn is_hydrated(&self) -> bool {
        self.read().hydrated
    }

    pub fn actor(&self) -> Actor {
        let session = self.read();
        Actor {
            roles: session.roles.clone(),
            user_name: session.user_name.clone(),
            organization: session.organization.clone(),
        }
    }

    /// Resolve the user's organization through the user directory.
    /// Failures are logged and still complete hydration.
    pub async fn hydrate(&self, directory: &dyn UserDirectory) {
        let Some(user_name) = self.current_user_name() else {
            debug!("Skipping hydration, no user identity");
            return;
        };

        match directory.fetch_users().await {
            Ok(users) => {
                let me = users
                    .iter()
                    .find(|user| user.email == user_name || user.name == user_name);
                let mut session = self.write();
                if session.user_name.as_deref() != Some(user_name.as_str()) {
                    debug!("Identity changed during hydration, discarding result");
                    return;
                }
                if let Some(me) = me {
                    session.user_id = Some(me.id.clone());
                    session.organization = me
                        .organization_name
                        .clone()
                        .filter(|org| !org.trim().is_empty());
                    info!(
                        user = %user_name,
                        organization = session.organization.as_deref().unwrap_or(""),
                        "User hydrated"
                    );
                } else {
                    warn!(user = %user_name, "User not found in directory");
                }
                session.hydrated = true;
            }
            Err(err) => {
                warn!(user = %user_name, error = ?err, "Failed to fetch user directory");
                let mut session = self.write();
                if session.user_name.as_deref() == Some(user_name.as_str()) {
                    session.hydrated = true;
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}
