pub mod auth;
pub mod config;
pub mod err;
pub mod models;
pub mod policy;
pub mod registration;
pub mod seed;
pub mod stats;
pub mod store;
pub mod students;

use std::sync::Arc;

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Router};
use chrono::Duration;
use serde::Serialize;
use tower::ServiceBuilder;

pub use crate::err::{Error, Maybe};
use crate::err::{Fine, Nothing};
use crate::policy::RegistrationRules;
use crate::store::Store;

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}

/// Shared by every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub rules: RegistrationRules,
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, rules: RegistrationRules, session_ttl: Duration) -> Self {
        Self {
            store,
            rules,
            session_ttl,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/login", post(auth::login_student))
        .route("/auth/logout", post(auth::drop_session))
        .route("/auth/password/verify", post(auth::verify_student_for_password_reset))
        .route("/auth/password/reset", post(auth::reset_password_after_verification))
        .route("/auth/password/change", post(auth::change_password))
        .route("/auth/password/change-own", post(auth::change_own_password))
        .route("/me", get(auth::current_student));

    let registration_routes = Router::new()
        .route("/registration", post(registration::update_student_registration))
        .route("/registration/status", get(registration::registration_status))
        .route("/registration/deadline", get(registration::registration_deadline))
        .route("/registration/settings", get(registration::registration_toggles))
        .route("/subjects", get(registration::subjects))
        .route("/custom-fields", get(registration::custom_fields));

    let admin_routes = Router::new()
        .route("/admin/registration/lock", post(registration::set_registration_lock))
        .route(
            "/admin/registration/deadline",
            post(registration::set_registration_deadline),
        )
        .route(
            "/admin/registration/settings",
            post(registration::update_registration_toggles),
        )
        .route("/admin/subjects", post(registration::update_subjects))
        .route("/admin/custom-fields", post(registration::update_custom_fields))
        .route(
            "/admin/students",
            get(students::list_students)
                .post(students::add_student)
                .delete(students::delete_all_students),
        )
        .route("/admin/students/batch", post(students::add_students_batch))
        .route("/admin/students/delete", post(students::delete_students))
        .route(
            "/admin/students/:id",
            get(students::get_student).patch(students::update_student),
        )
        .route(
            "/admin/students/:id/password",
            post(students::reset_student_password),
        )
        .route(
            "/admin/students/:id/registration",
            post(students::save_student_registration),
        )
        .route("/admin/stats", get(stats::registration_stats));

    Router::new()
        .merge(auth_routes)
        .merge(registration_routes)
        .merge(admin_routes)
        .fallback(err::handler404.into_service())
        .layer(ServiceBuilder::new().layer(Extension(state)))
}
