//! Bearer token claims and the signed-in user context.
//!
//! Role flags are read from the token payload without verifying the signature; the backend
//! stays the authority. The client only uses them to decide what to show.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::api::users::CurrentUser;
use crate::prefs::{PrefStore, PrefsError, KEY_AUTHORIZATION};

/// Role assigned when the backend reports none, so role checks always see a non-empty list.
pub const DEFAULT_ROLE: &str = "DEFAULT_ROLE";

/// Claims the client cares about. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub is_system_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token is not a three-part JWT")]
    Shape,
    #[error("token payload is not valid base64url: {0}")]
    Base64(String),
    #[error("token payload is not a JSON object: {0}")]
    Json(String),
}

/// Decode the payload segment of a JWT. Accepts an optional `Bearer ` prefix.
pub fn parse_claims(token: &str) -> Result<Claims, ClaimsError> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(p), Some(_), None) if !p.is_empty() => p,
        _ => return Err(ClaimsError::Shape),
    };
    // Some issuers pad the segment, the URL-safe engine below does not accept padding.
    let payload = payload.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClaimsError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Json(e.to_string()))
}

impl Claims {
    /// True if the token carries an `exp` that is at or before `now_secs`.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.exp.is_some_and(|exp| exp <= now_secs)
    }

    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.exp
            .and_then(|exp| chrono::DateTime::from_timestamp(exp, 0))
    }
}

/// Signed-in user state: token, roles, and admin flags. One per process, passed explicitly.
#[derive(Debug, Clone, Default)]
pub struct UserSession {
    pub token: String,
    pub roles: Vec<String>,
    pub username: String,
    pub is_super_admin: bool,
    pub is_system_admin: bool,
}

impl UserSession {
    /// Restore from the preference store. A stored token with unreadable claims keeps the token but no admin flags.
    pub fn hydrate(prefs: &PrefStore) -> Self {
        let mut session = Self::default();
        if let Some(token) = prefs.get(KEY_AUTHORIZATION).filter(|t| !t.trim().is_empty()) {
            session.token = token.to_string();
            session.apply_claims_from_token();
        }
        session
    }

    /// Persist a new token, clear cached roles (they are refetched), and apply the token's claims.
    pub fn set_token(&mut self, prefs: &mut PrefStore, token: &str) -> Result<(), PrefsError> {
        let token = token.trim();
        prefs.set(KEY_AUTHORIZATION, token)?;
        self.token = token.to_string();
        self.roles.clear();
        self.apply_claims_from_token();
        Ok(())
    }

    /// Apply the current-user response. Flags present in the response win over token claims.
    pub fn apply_user_info(&mut self, info: &CurrentUser) {
        self.username = info.username.clone();
        self.roles = if info.roles.is_empty() {
            vec![DEFAULT_ROLE.to_string()]
        } else {
            info.roles.clone()
        };
        if let Some(v) = info.is_super_admin {
            self.is_super_admin = v;
        }
        if let Some(v) = info.is_system_admin {
            self.is_system_admin = v;
        }
    }

    /// Forget the token everywhere and reset to the signed-out state.
    pub fn logout(&mut self, prefs: &mut PrefStore) -> Result<(), PrefsError> {
        prefs.remove(KEY_AUTHORIZATION)?;
        *self = Self::default();
        Ok(())
    }

    pub fn is_signed_in(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        self.is_super_admin || self.is_system_admin
    }

    fn apply_claims_from_token(&mut self) {
        match parse_claims(&self.token) {
            Ok(claims) => {
                self.is_super_admin = claims.is_super_admin;
                self.is_system_admin = claims.is_system_admin;
            }
            Err(e) => {
                log::warn!("auth: could not read token claims: {}", e);
                self.is_super_admin = false;
                self.is_system_admin = false;
            }
        }
    }
}
