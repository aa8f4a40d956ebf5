use std::collections::BTreeSet;

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::auth::{check_new_password, hash_password, AdminOnly, ADMIN_RESET_MIN_LEN};
use crate::models::{
    NewStudent, Role, Student, StudentDetails, StudentDraft, StudentPatch, Submission,
};
use crate::policy::{check_form, check_review_limit, compute_completion_status, CompletionStatus};
use crate::store::StudentFilter;
use crate::{breaks, proceeds, AppState, Error, Payload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Incomplete,
}

impl StatusFilter {
    fn admits(&self, status: CompletionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Completed => status == CompletionStatus::Completed,
            StatusFilter::Incomplete => status == CompletionStatus::Incomplete,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentQuery {
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    status: StatusFilter,
}

fn draft_from(new: &NewStudent) -> Result<StudentDraft, Error> {
    let code = new.ma_hocsinh.trim();
    if code.is_empty() || new.hoten.trim().is_empty() {
        return Err(Error::invalid_payload(
            "`ma_hocsinh` and `hoten` must not be empty",
        ));
    }
    Ok(StudentDraft {
        ma_hocsinh: code.to_string(),
        hoten: new.hoten.trim().to_string(),
        ngaysinh: new.ngaysinh.trim().to_string(),
        lop: new.lop.trim().to_string(),
        role: Role::Student,
        must_change_password: true,
        password_hash: hash_password(new.initial_password())?,
    })
}

pub async fn list_students(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Query(query): Query<StudentQuery>,
) -> Payload<StudentList> {
    let settings = state.store.load().await?;
    let filter = StudentFilter {
        search: query.search,
        class: query.class,
        ..StudentFilter::students()
    };

    let students: Vec<StudentOverview> = state
        .store
        .list(&filter)
        .await?
        .into_iter()
        .map(|student| {
            let status = compute_completion_status(&student, &settings, &state.rules.completion);
            StudentOverview { student, status }
        })
        .filter(|overview| query.status.admits(overview.status))
        .collect();

    let classes: BTreeSet<String> = state
        .store
        .list(&StudentFilter::students())
        .await?
        .into_iter()
        .map(|student| student.lop)
        .filter(|class| !class.is_empty())
        .collect();

    proceeds(StudentList {
        total: students.len(),
        students,
        classes: classes.into_iter().collect(),
    })
}

pub async fn get_student(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
) -> Payload<StudentOverview> {
    let settings = state.store.load().await?;
    let student = state.store.get(id).await?;
    let status = compute_completion_status(&student, &settings, &state.rules.completion);
    proceeds(StudentOverview { student, status })
}

pub async fn add_student(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(new): Json<NewStudent>,
) -> Payload<StudentRecord> {
    let draft = draft_from(&new)?;
    let student = state.store.insert(draft).await?;
    log::info!(
        "admin #{} added student #{} ({})",
        admin.student.id,
        student.id,
        student.ma_hocsinh
    );
    proceeds(StudentRecord { student })
}

pub async fn add_students_batch(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(batch): Json<Vec<NewStudent>>,
) -> Payload<StudentsCreated> {
    if batch.is_empty() {
        return breaks(Error::invalid_payload("No students to add"));
    }
    let drafts = batch
        .iter()
        .map(draft_from)
        .collect::<Result<Vec<_>, _>>()?;

    let students = state.store.insert_batch(drafts).await?;
    log::info!(
        "admin #{} added {} students",
        admin.student.id,
        students.len()
    );
    proceeds(StudentsCreated {
        created: students.len(),
        students,
    })
}

pub async fn update_student(
    AdminOnly(_): AdminOnly,
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
    Json(details): Json<StudentDetails>,
) -> Payload<StudentRecord> {
    let blank = |value: &Option<String>| value.as_deref().map_or(false, |v| v.trim().is_empty());
    if blank(&details.ma_hocsinh) || blank(&details.hoten) {
        return breaks(Error::invalid_payload(
            "`ma_hocsinh` and `hoten` must not be empty",
        ));
    }
    let student = state.store.put(id, details.into()).await?;
    proceeds(StudentRecord { student })
}

/// Deletes the listed accounts. The requesting admin is never deleted.
pub async fn delete_students(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Json(body): Json<DeleteStudents>,
) -> Payload<StudentsDeleted> {
    let own_id = admin.student.id;
    let skipped_self = body.ids.contains(&own_id).then(|| own_id);
    let ids: Vec<i32> = body.ids.into_iter().filter(|id| *id != own_id).collect();
    if ids.is_empty() {
        return breaks(Error::invalid_payload("No students selected"));
    }

    let deleted = state.store.delete(&ids).await?;
    log::info!("admin #{} deleted {} accounts", own_id, deleted);
    proceeds(StudentsDeleted {
        deleted,
        skipped_self,
    })
}

pub async fn delete_all_students(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
) -> Payload<StudentsDeleted> {
    let deleted = state.store.delete_all_students().await?;
    log::warn!(
        "admin #{} deleted all {} student accounts",
        admin.student.id,
        deleted
    );
    proceeds(StudentsDeleted {
        deleted,
        skipped_self: None,
    })
}

/// Without a new password the account falls back to its student code and
/// has to pick a new one on next login.
pub async fn reset_student_password(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
    body: Option<Json<ResetStudentPassword>>,
) -> Payload<PasswordReset> {
    let student = state.store.get(id).await?;
    let requested = body
        .and_then(|Json(body)| body.new_password)
        .filter(|password| !password.is_empty());

    let (password, must_change) = match requested {
        Some(password) => {
            check_new_password(&password, ADMIN_RESET_MIN_LEN)?;
            (password, false)
        }
        None => (student.ma_hocsinh.clone(), true),
    };

    state
        .store
        .set_password_hash(id, hash_password(&password)?)
        .await?;
    state
        .store
        .put(id, StudentPatch::password_changed(must_change))
        .await?;
    state.store.drop_sessions_for(id).await?;
    log::info!(
        "admin #{} reset the password of student #{}",
        admin.student.id,
        id
    );

    proceeds(PasswordReset {
        student_id: id,
        must_change_password: must_change,
    })
}

/// Saves a registration on a student's behalf. The lock does not apply to
/// admins, the form checks do.
pub async fn save_student_registration(
    AdminOnly(admin): AdminOnly,
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
    Json(submission): Json<Submission>,
) -> Payload<StudentRecord> {
    let target = state.store.get(id).await?;
    if target.is_admin() {
        return breaks(Error::invalid_payload(
            "Administrators do not register for subjects",
        ));
    }

    let settings = state.store.load().await?;
    let submission = submission.dedup();
    check_form(&settings, &submission)?;
    check_review_limit(&settings, &submission, &state.rules)?;

    let student = state
        .store
        .put(id, StudentPatch::registration(submission, Utc::now()))
        .await?;
    log::info!(
        "admin #{} saved the registration of student #{}",
        admin.student.id,
        id
    );
    proceeds(StudentRecord { student })
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentOverview {
    #[serde(flatten)]
    pub student: Student,
    pub status: CompletionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentList {
    pub students: Vec<StudentOverview>,
    pub classes: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRecord {
    pub student: Student,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentsCreated {
    pub created: usize,
    pub students: Vec<Student>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct StudentsDeleted {
    pub deleted: u64,
    pub skipped_self: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordReset {
    pub student_id: i32,
    pub must_change_password: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteStudents {
    pub ids: Vec<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetStudentPassword {
    #[serde(default)]
    pub new_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_student(code: &str, name: &str) -> NewStudent {
        NewStudent {
            ma_hocsinh: code.into(),
            hoten: name.into(),
            ngaysinh: "2006-05-12".into(),
            lop: " 12A1 ".into(),
            cccd: None,
        }
    }

    #[test]
    fn drafts_are_trimmed_and_flagged_for_password_change() {
        let draft = draft_from(&new_student(" HS1 ", "Nguyen Van A")).expect("draft");
        assert_eq!(draft.ma_hocsinh, "HS1");
        assert_eq!(draft.lop, "12A1");
        assert_eq!(draft.role, Role::Student);
        assert!(draft.must_change_password);
        assert!(draft.password_hash.starts_with("$pbkdf2"));
    }

    #[test]
    fn drafts_need_code_and_name() {
        assert!(draft_from(&new_student("  ", "Nguyen Van A")).is_err());
        assert!(draft_from(&new_student("HS1", "")).is_err());
    }

    #[test]
    fn status_filter_parses_and_admits() {
        let query: StudentQuery =
            serde_json::from_str(r#"{"status": "completed"}"#).expect("query");
        assert_eq!(query.status, StatusFilter::Completed);
        assert!(query.status.admits(CompletionStatus::Completed));
        assert!(!query.status.admits(CompletionStatus::Incomplete));
        assert!(StatusFilter::default().admits(CompletionStatus::Incomplete));
    }

    #[test]
    fn deleted_response_omits_absent_self() {
        let value = serde_json::to_value(StudentsDeleted {
            deleted: 3,
            skipped_self: None,
        })
        .expect("json");
        assert_eq!(value, serde_json::json!({ "deleted": 3 }));
    }
}
