use std::collections::HashSet;

use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AdminOnly, Authenticated};
use crate::models::{
    CustomField, RegistrationSettings, RegistrationToggles, Student, StudentPatch, SubjectCatalog,
    Submission,
};
use crate::policy::{check_review_limit, evaluate_lock_state, validate_submission};
use crate::store::Store;
use crate::{breaks, proceeds, AppState, Error, Payload};

/// Loads the settings, applies `change` and writes them back. Last write wins.
pub(crate) async fn modify_settings<F>(
    store: &dyn Store,
    change: F,
) -> Result<RegistrationSettings, Error>
where
    F: FnOnce(&mut RegistrationSettings) + Send,
{
    let mut settings = store.load().await?;
    change(&mut settings);
    store.save(&settings).await?;
    Ok(settings)
}

pub async fn registration_status(
    Extension(state): Extension<AppState>,
) -> Payload<RegistrationStatus> {
    let settings = state.store.load().await?;
    proceeds(RegistrationStatus::of(&settings, Utc::now()))
}

pub async fn registration_deadline(Extension(state): Extension<AppState>) -> Payload<Deadline> {
    let settings = state.store.load().await?;
    proceeds(Deadline {
        deadline: settings.registration_deadline,
    })
}

pub async fn registration_toggles(
    Extension(state): Extension<AppState>,
) -> Payload<RegistrationToggles> {
    proceeds(state.store.load().await?.registration_settings)
}

pub async fn subjects(Extension(state): Extension<AppState>) -> Payload<SubjectCatalog> {
    proceeds(state.store.load().await?.catalog())
}

pub async fn custom_fields(Extension(state): Extension<AppState>) -> Payload<CustomFields> {
    proceeds(CustomFields {
        fields: state.store.load().await?.custom_form_fields,
    })
}

/// Saves the logged-in student's registration if the policy accepts it.
pub async fn update_student_registration(
    auth: Authenticated,
    Extension(state): Extension<AppState>,
    Json(submission): Json<Submission>,
) -> Payload<RegistrationSaved> {
    if auth.student.is_admin() {
        return breaks(Error::Forbidden {
            message: "Administrators do not register for subjects".to_string(),
        });
    }

    let settings = state.store.load().await?;
    let submission = submission.dedup();
    let now = Utc::now();

    let verdict = validate_submission(&settings, &submission, now)
        .and_then(|_| check_review_limit(&settings, &submission, &state.rules));
    if let Err(reason) = verdict {
        log::warn!(
            "registration of student #{} rejected: {}",
            auth.student.id,
            reason
        );
        return breaks(reason.into());
    }

    let student = state
        .store
        .put(auth.student.id, StudentPatch::registration(submission, now))
        .await?;
    log::info!("student #{} saved their registration", student.id);

    proceeds(RegistrationSaved { student })
}

pub async fn set_registration_lock(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(body): Json<SetLock>,
) -> Payload<RegistrationStatus> {
    let settings = modify_settings(state.store.as_ref(), |settings| {
        settings.is_registration_locked = body.locked
    })
    .await?;
    log::info!(
        "admin #{} set the registration lock to {}",
        admin.student.id,
        body.locked
    );
    proceeds(RegistrationStatus::of(&settings, Utc::now()))
}

pub async fn set_registration_deadline(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(body): Json<Deadline>,
) -> Payload<RegistrationStatus> {
    let settings = modify_settings(state.store.as_ref(), |settings| {
        settings.registration_deadline = body.deadline
    })
    .await?;
    log::info!(
        "admin #{} moved the registration deadline to {}",
        admin.student.id,
        body.deadline
    );
    proceeds(RegistrationStatus::of(&settings, Utc::now()))
}

pub async fn update_registration_toggles(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(toggles): Json<RegistrationToggles>,
) -> Payload<RegistrationToggles> {
    let settings = modify_settings(state.store.as_ref(), |settings| {
        settings.registration_settings = toggles
    })
    .await?;
    proceeds(settings.registration_settings)
}

pub async fn update_subjects(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(catalog): Json<SubjectCatalog>,
) -> Payload<SubjectCatalog> {
    check_catalog(&catalog)?;
    let settings = modify_settings(state.store.as_ref(), |settings| {
        settings.review_subjects = catalog.review;
        settings.exam_subjects = catalog.exam;
    })
    .await?;
    proceeds(settings.catalog())
}

pub async fn update_custom_fields(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(fields): Json<Vec<CustomField>>,
) -> Payload<CustomFields> {
    check_custom_fields(&fields)?;
    let settings = modify_settings(state.store.as_ref(), |settings| {
        settings.custom_form_fields = fields
    })
    .await?;
    proceeds(CustomFields {
        fields: settings.custom_form_fields,
    })
}

fn check_catalog(catalog: &SubjectCatalog) -> Result<(), Error> {
    for (kind, subjects) in [("review", &catalog.review), ("exam", &catalog.exam)] {
        let mut seen = HashSet::new();
        for subject in subjects {
            if subject.name.trim().is_empty() {
                return Err(Error::invalid_payload(format!(
                    "{} subject #{} has no name",
                    kind, subject.id
                )));
            }
            if !seen.insert(subject.id) {
                return Err(Error::invalid_payload(format!(
                    "{} subject id {} is listed twice",
                    kind, subject.id
                )));
            }
        }
    }
    Ok(())
}

fn check_custom_fields(fields: &[CustomField]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for field in fields {
        if field.id.trim().is_empty() || field.label.trim().is_empty() {
            return Err(Error::invalid_payload(
                "custom fields need a non-empty id and label",
            ));
        }
        if !seen.insert(field.id.as_str()) {
            return Err(Error::invalid_payload(format!(
                "custom field `{}` is defined twice",
                field.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub locked: bool,
    pub manually_locked: bool,
    pub deadline: DateTime<Utc>,
}

impl RegistrationStatus {
    fn of(settings: &RegistrationSettings, now: DateTime<Utc>) -> Self {
        Self {
            locked: evaluate_lock_state(settings, now),
            manually_locked: settings.is_registration_locked,
            deadline: settings.registration_deadline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deadline {
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetLock {
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomFields {
    pub fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSaved {
    pub student: Student,
}
