//! Auth gate: session cookie to authenticated user, plus module access.
//!
//! Every failure to establish who the caller is collapses into
//! [`AppError::Unauthenticated`]. Missing cookie, bad signature, expired
//! session, unknown user and deactivated user are indistinguishable to the
//! client, so the endpoint cannot be used to enumerate accounts.

use std::sync::Arc;

use axum::http::HeaderMap;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{AuthUser, ModuleKey};
use crate::permissions::{Access, resolve_access};
use crate::session::{Session, SessionCodec};
use crate::users::UserDirectory;

/// Resolves the caller of a request.
#[derive(Clone)]
pub struct AuthGate {
    codec: SessionCodec,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl AuthGate {
    pub fn new(codec: SessionCodec, users: Arc<dyn UserDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            codec,
            users,
            clock,
        }
    }

    /// Require a valid session for an existing, active user.
    pub async fn require_authenticated_user(&self, headers: &HeaderMap) -> AppResult<AuthUser> {
        let Some(session) = self.codec.current_session(headers, self.clock.now()) else {
            debug!("no valid session");
            return Err(AppError::Unauthenticated);
        };
        self.resolve_session(&session).await
    }

    /// Require an authenticated user who may access `module`.
    pub async fn require_module_access(
        &self,
        headers: &HeaderMap,
        module: ModuleKey,
    ) -> AppResult<AuthUser> {
        let user = self.require_authenticated_user(headers).await?;

        match resolve_access(&user, module) {
            Access::Denied => {
                debug!(user_id = %user.id, module = %module, "module access denied");
                Err(AppError::Forbidden)
            }
            access => {
                debug!(user_id = %user.id, module = %module, via = ?access, "module access granted");
                Ok(user)
            }
        }
    }

    /// Look up the user a session refers to.
    pub async fn resolve_session(&self, session: &Session) -> AppResult<AuthUser> {
        let record = self
            .users
            .find_by_id(&session.user_id)
            .await
            .map_err(AppError::Upstream)?;

        match record {
            Some(record) if record.is_active => Ok(record.to_auth_user()),
            Some(_) => {
                debug!(user_id = %session.user_id, "session refers to inactive user");
                Err(AppError::Unauthenticated)
            }
            None => {
                debug!(user_id = %session.user_id, "session refers to unknown user");
                Err(AppError::Unauthenticated)
            }
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("codec", &self.codec)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
