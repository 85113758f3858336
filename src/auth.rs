//! Password hashing and session cookie handling.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::db::Session;
use crate::models::User;

pub const SESSION_COOKIE: &str = "session";
pub const SIGNIN_PATH: &str = "/user/signin";
pub const DASHBOARD_PATH: &str = "/";

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// The signed-in user of a request, placed in the request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

pub fn session_cookie(id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

/// Resolves the session cookie to an active user. Expired sessions and
/// deactivated accounts resolve to nothing.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Option<CurrentUser> {
    let id = jar.get(SESSION_COOKIE)?.value().to_string();
    if id.is_empty() {
        return None;
    }

    let db = state.database.lock().await;
    let session = match db.session(&id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            debug!("Unknown or expired session");
            return None;
        }
        Err(e) => {
            warn!("Could not load session: {}", e);
            return None;
        }
    };

    match db.user_by_id(session.user_id) {
        Ok(Some(user)) if user.active => Some(CurrentUser { user, session }),
        Ok(_) => None,
        Err(e) => {
            warn!("Could not load user {}: {}", session.user_id, e);
            None
        }
    }
}

/// Lets the request through with a [`CurrentUser`] extension, or sends the
/// browser to the sign-in page.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match current_user(&state, &jar).await {
        Some(current) => {
            request.extensions_mut().insert(current);
            next.run(request).await
        }
        None => (jar.remove(removal_cookie()), Redirect::to(SIGNIN_PATH)).into_response(),
    }
}

/// Lets administrators through and sends everyone else to the dashboard.
/// Must be layered inside [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Response {
    let current = request.extensions().get::<CurrentUser>();
    if !current.is_some_and(|c| c.user.admin) {
        warn!(
            username = current.map(|c| c.user.username.as_str()).unwrap_or_default(),
            "User is not an admin"
        );
        return Redirect::to(DASHBOARD_PATH).into_response();
    }

    next.run(request).await
}
