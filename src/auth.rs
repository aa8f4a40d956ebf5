use axum::extract::{FromRequest, RequestParts};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::{async_trait, Extension, Json, TypedHeader};
use chrono::{DateTime, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Role, Student, StudentPatch, StudentSession};
use crate::store::Store;
use crate::{breaks, proceeds, AppState, Error, Payload};

pub const MIN_PASSWORD_LEN: usize = 8;
/// Shorter minimum for passwords an admin sets on a student's behalf.
pub const ADMIN_RESET_MIN_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Success(StudentSession),
    SessionExpired,
    InvalidSession,
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(password_hash)?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
}

fn new_session_id() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(&ssid_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}

pub(crate) fn check_new_password(password: &str, min_len: usize) -> Result<(), Error> {
    if password.chars().count() < min_len {
        return Err(Error::invalid_payload(format!(
            "New password must be at least {} characters long",
            min_len
        )));
    }
    Ok(())
}

pub async fn ensure_authenticated(
    session_id: Option<String>,
    store: &dyn Store,
) -> Result<AuthResult, Error> {
    let ssid = match session_id {
        Some(ssid) if !ssid.is_empty() => ssid,
        _ => return Ok(AuthResult::InvalidSession),
    };

    let session = match store.find_session(&ssid).await? {
        Some(session) => session,
        None => return Ok(AuthResult::InvalidSession),
    };

    if session.is_expired(Utc::now()) {
        store.drop_session(&ssid, session.belongs_to).await?;
        return Ok(AuthResult::SessionExpired);
    }
    Ok(AuthResult::Success(session))
}

/// The logged-in account behind the request's bearer session.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub student: Student,
    pub session: StudentSession,
}

#[async_trait]
impl<B> FromRequest<B> for Authenticated
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|_| Error::InternalError {
                kind: "StateError",
                message: "application state is not configured".to_string(),
            })?;

        let ssid = TypedHeader::<Authorization<Bearer>>::from_request(req)
            .await
            .ok()
            .map(|TypedHeader(authorization)| authorization.token().to_string());

        match ensure_authenticated(ssid, state.store.as_ref()).await? {
            AuthResult::Success(session) => {
                let student = state.store.get(session.belongs_to).await?;
                Ok(Self { student, session })
            }
            AuthResult::SessionExpired => Err(Error::Unauthorized {
                message: "Session expired, please log in again".to_string(),
            }),
            AuthResult::InvalidSession => Err(Error::Unauthorized {
                message: "Missing or invalid session".to_string(),
            }),
        }
    }
}

/// Like [`Authenticated`], but only admits admins.
#[derive(Debug, Clone)]
pub struct AdminOnly(pub Authenticated);

#[async_trait]
impl<B> FromRequest<B> for AdminOnly
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let auth = Authenticated::from_request(req).await?;
        if auth.student.role != Role::Admin {
            return Err(Error::Forbidden {
                message: "Administrator access required".to_string(),
            });
        }
        Ok(AdminOnly(auth))
    }
}

pub async fn login_student(
    Extension(state): Extension<AppState>,
    Json(login): Json<LoginStudent>,
) -> Payload<LoggedInStudent> {
    if login.password.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`password` parameter was empty".to_string(),
        });
    }

    let invalid = || Error::InvalidCredentials {
        message: "Invalid student code or password".to_string(),
    };

    let student = if let Some(user) = state.store.find_by_code(&login.ma_hocsinh).await? {
        user
    } else {
        log::warn!("login attempt for unknown student code `{}`", login.ma_hocsinh);
        return breaks(invalid());
    };

    let matches = match state.store.password_hash(student.id).await? {
        Some(hash) => verify_password(&login.password, &hash)?,
        None => false,
    };
    if !matches {
        log::warn!("wrong password for student #{}", student.id);
        return breaks(invalid());
    }

    if let Some(existing) = state.store.session_for(student.id).await? {
        if !existing.is_expired(Utc::now()) {
            // already authenticated
            return proceeds(LoggedInStudent {
                session_id: existing.ssid,
                student_id: existing.belongs_to,
                expires_at: existing.expires_at,
                user: student,
            });
        }
        state.store.drop_session(&existing.ssid, student.id).await?;
    }

    let expires_at = Utc::now()
        .checked_add_signed(state.session_ttl)
        .ok_or_else(|| Error::InternalError {
            kind: "SessionError",
            message: "session lifetime is out of range".to_string(),
        })?;
    let session = StudentSession {
        ssid: new_session_id(),
        belongs_to: student.id,
        expires_at,
    };
    state.store.create_session(session.clone()).await?;
    log::info!("student #{} logged in", student.id);

    proceeds(LoggedInStudent {
        session_id: session.ssid,
        student_id: student.id,
        expires_at,
        user: student,
    })
}

pub async fn drop_session(
    auth: Authenticated,
    Extension(state): Extension<AppState>,
) -> Payload<SessionDropped> {
    let dropped = state
        .store
        .drop_session(&auth.session.ssid, auth.student.id)
        .await?;

    proceeds(SessionDropped {
        student_id: auth.student.id,
        drop_success: dropped,
    })
}

pub async fn current_student(auth: Authenticated) -> Payload<Student> {
    proceeds(auth.student)
}

/// First-login password change, only allowed while the account is flagged.
pub async fn change_password(
    auth: Authenticated,
    Extension(state): Extension<AppState>,
    Json(body): Json<ChangePassword>,
) -> Payload<PasswordChanged> {
    if !auth.student.must_change_password {
        return breaks(Error::Forbidden {
            message: "Password change requires the current password".to_string(),
        });
    }
    check_new_password(&body.new_password, MIN_PASSWORD_LEN)?;

    let id = auth.student.id;
    state
        .store
        .set_password_hash(id, hash_password(&body.new_password)?)
        .await?;
    state.store.put(id, StudentPatch::password_changed(false)).await?;
    log::info!("student #{} set their first password", id);

    proceeds(PasswordChanged { student_id: id })
}

pub async fn change_own_password(
    auth: Authenticated,
    Extension(state): Extension<AppState>,
    Json(body): Json<ChangeOwnPassword>,
) -> Payload<PasswordChanged> {
    let id = auth.student.id;
    let current = state.store.password_hash(id).await?;
    let matches = match current {
        Some(hash) => verify_password(&body.old_password, &hash)?,
        None => false,
    };
    if !matches {
        return breaks(Error::InvalidCredentials {
            message: "Current password is incorrect".to_string(),
        });
    }
    check_new_password(&body.new_password, MIN_PASSWORD_LEN)?;

    state
        .store
        .set_password_hash(id, hash_password(&body.new_password)?)
        .await?;
    state.store.put(id, StudentPatch::password_changed(false)).await?;
    log::info!("student #{} changed their password", id);

    proceeds(PasswordChanged { student_id: id })
}

async fn find_for_reset(store: &dyn Store, identity: &ResetIdentity) -> Result<Student, Error> {
    let student = store.find_by_code(identity.ma_hocsinh.trim()).await?;
    match student {
        Some(student)
            if student.role == Role::Student && student.ngaysinh == identity.ngaysinh.trim() =>
        {
            Ok(student)
        }
        _ => Err(Error::InvalidCredentials {
            message: "Student code and date of birth do not match".to_string(),
        }),
    }
}

pub async fn verify_student_for_password_reset(
    Extension(state): Extension<AppState>,
    Json(identity): Json<ResetIdentity>,
) -> Payload<VerifiedStudent> {
    let student = find_for_reset(state.store.as_ref(), &identity).await?;
    proceeds(VerifiedStudent {
        student_id: student.id,
    })
}

/// Re-checks code and birth date before replacing the password, so the
/// reset cannot be replayed against another account.
pub async fn reset_password_after_verification(
    Extension(state): Extension<AppState>,
    Json(body): Json<ResetPassword>,
) -> Payload<PasswordChanged> {
    let student = find_for_reset(state.store.as_ref(), &body.identity).await?;
    check_new_password(&body.new_password, MIN_PASSWORD_LEN)?;

    state
        .store
        .set_password_hash(student.id, hash_password(&body.new_password)?)
        .await?;
    state
        .store
        .put(student.id, StudentPatch::password_changed(false))
        .await?;
    state.store.drop_sessions_for(student.id).await?;
    log::info!("student #{} reset their password", student.id);

    proceeds(PasswordChanged {
        student_id: student.id,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDropped {
    pub student_id: i32,
    pub drop_success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedInStudent {
    session_id: String,
    student_id: i32,
    expires_at: DateTime<Utc>,
    user: Student,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChanged {
    student_id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedStudent {
    student_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginStudent {
    ma_hocsinh: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePassword {
    new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeOwnPassword {
    old_password: String,
    new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetIdentity {
    ma_hocsinh: String,
    ngaysinh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPassword {
    #[serde(flatten)]
    identity: ResetIdentity,
    new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentDraft;
    use crate::store::{CredentialStore, MemoryStore, StudentStore};
    use chrono::Duration;

    #[test]
    fn hashes_verify_and_are_salted() {
        let first = hash_password("HS2025001").expect("hash");
        let second = hash_password("HS2025001").expect("hash");
        assert_ne!(first, second);
        assert!(first.starts_with("$pbkdf2"));
        assert!(verify_password("HS2025001", &first).expect("verify"));
        assert!(!verify_password("hs2025001", &first).expect("verify"));
    }

    #[test]
    fn session_ids_are_hex_sha256() {
        let ssid = new_session_id();
        assert_eq!(ssid.len(), 64);
        assert!(ssid.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(ssid, new_session_id());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_new_password("1234567", MIN_PASSWORD_LEN).is_err());
        assert!(check_new_password("12345678", MIN_PASSWORD_LEN).is_ok());
        assert!(check_new_password("12345", ADMIN_RESET_MIN_LEN).is_err());
        assert!(check_new_password("123456", ADMIN_RESET_MIN_LEN).is_ok());
    }

    #[tokio::test]
    async fn expired_sessions_are_purged() {
        let store = MemoryStore::new();
        let student = store
            .insert(StudentDraft {
                ma_hocsinh: "HS1".into(),
                hoten: "A".into(),
                ngaysinh: "2006-01-01".into(),
                lop: "12A1".into(),
                role: Role::Student,
                must_change_password: false,
                password_hash: String::new(),
            })
            .await
            .unwrap();
        store
            .create_session(StudentSession {
                ssid: "old".into(),
                belongs_to: student.id,
                expires_at: Utc::now() - Duration::minutes(1),
            })
            .await
            .unwrap();

        let result = ensure_authenticated(Some("old".into()), &store).await.unwrap();
        assert_eq!(result, AuthResult::SessionExpired);
        assert!(store.find_session("old").await.unwrap().is_none());

        let missing = ensure_authenticated(None, &store).await.unwrap();
        assert_eq!(missing, AuthResult::InvalidSession);
    }
}
