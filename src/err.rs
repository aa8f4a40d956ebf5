#![allow(non_snake_case)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

use crate::policy::RejectionReason;
use crate::store::StoreError;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    Locked { message: String },
    IncompleteExamSubjects { message: String },
    MissingRequiredField { field_id: String, message: String },
    TooManyReviewSubjects { limit: usize, message: String },
    NotFound { message: String },
    Unauthorized { message: String },
    Forbidden { message: String },
    InvalidCredentials { message: String },
    InvalidPayload { message: String },
    UserAlreadyExists { message: String },
    InternalError { kind: &'static str, message: String },
}

impl Error {
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Locked { .. } => StatusCode::LOCKED,
            Error::IncompleteExamSubjects { .. }
            | Error::MissingRequiredField { .. }
            | Error::TooManyReviewSubjects { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Unauthorized { .. } | Error::InvalidCredentials { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::UserAlreadyExists { .. } => StatusCode::CONFLICT,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<RejectionReason> for Error {
    fn from(reason: RejectionReason) -> Self {
        let message = reason.to_string();
        match reason {
            RejectionReason::Locked => Self::Locked { message },
            RejectionReason::IncompleteExamSubjects => Self::IncompleteExamSubjects { message },
            RejectionReason::MissingRequiredField(field_id) => {
                Self::MissingRequiredField { field_id, message }
            }
            RejectionReason::TooManyReviewSubjects { limit } => {
                Self::TooManyReviewSubjects { limit, message }
            }
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound {
                message: err.to_string(),
            },
            StoreError::Conflict(_) => Self::UserAlreadyExists {
                message: err.to_string(),
            },
            StoreError::Unavailable(_) => Self::InternalError {
                kind: "DatabaseError",
                message: err.to_string(),
            },
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}
