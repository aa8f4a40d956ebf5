use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Role::Admin),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

/// A student (or admin) account together with its registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i32,
    #[serde(rename = "ma_hocsinh")]
    pub ma_hocsinh: String,
    pub hoten: String,
    pub ngaysinh: String,
    pub lop: String,
    pub role: Role,
    pub must_change_password: bool,
    #[serde(default)]
    pub review_subjects: Vec<i32>,
    #[serde(default)]
    pub exam_subjects: Vec<i32>,
    #[serde(default)]
    pub registration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
}

impl Student {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub(crate) fn apply(&mut self, patch: StudentPatch) {
        if let Some(code) = patch.ma_hocsinh {
            self.ma_hocsinh = code;
        }
        if let Some(name) = patch.hoten {
            self.hoten = name;
        }
        if let Some(born) = patch.ngaysinh {
            self.ngaysinh = born;
        }
        if let Some(class) = patch.lop {
            self.lop = class;
        }
        if let Some(flag) = patch.must_change_password {
            self.must_change_password = flag;
        }
        if let Some(review) = patch.review_subjects {
            self.review_subjects = review;
        }
        if let Some(exam) = patch.exam_subjects {
            self.exam_subjects = exam;
        }
        if let Some(data) = patch.custom_data {
            self.custom_data = data;
        }
        if let Some(at) = patch.registration_date {
            self.registration_date = Some(at);
        }
    }
}

/// Partial update of a student record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentPatch {
    pub ma_hocsinh: Option<String>,
    pub hoten: Option<String>,
    pub ngaysinh: Option<String>,
    pub lop: Option<String>,
    pub must_change_password: Option<bool>,
    pub review_subjects: Option<Vec<i32>>,
    pub exam_subjects: Option<Vec<i32>>,
    pub custom_data: Option<BTreeMap<String, String>>,
    pub registration_date: Option<DateTime<Utc>>,
}

impl StudentPatch {
    /// Patch persisting an accepted submission, stamped with `at`.
    pub fn registration(submission: Submission, at: DateTime<Utc>) -> Self {
        Self {
            review_subjects: Some(submission.review_subjects),
            exam_subjects: Some(submission.exam_subjects),
            custom_data: Some(submission.custom_data),
            registration_date: Some(at),
            ..Self::default()
        }
    }

    pub fn password_changed(must_change: bool) -> Self {
        Self {
            must_change_password: Some(must_change),
            ..Self::default()
        }
    }
}

/// Admin edit of a student's identity. Registration fields are not
/// accepted here and go through the registration save instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentDetails {
    #[serde(default)]
    pub ma_hocsinh: Option<String>,
    #[serde(default)]
    pub hoten: Option<String>,
    #[serde(default)]
    pub ngaysinh: Option<String>,
    #[serde(default)]
    pub lop: Option<String>,
}

impl From<StudentDetails> for StudentPatch {
    fn from(details: StudentDetails) -> Self {
        Self {
            ma_hocsinh: details.ma_hocsinh,
            hoten: details.hoten,
            ngaysinh: details.ngaysinh,
            lop: details.lop,
            ..Self::default()
        }
    }
}

/// Admin input for a new student. `cccd` seeds the initial password.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub ma_hocsinh: String,
    pub hoten: String,
    pub ngaysinh: String,
    pub lop: String,
    #[serde(default)]
    pub cccd: Option<String>,
}

impl NewStudent {
    pub fn initial_password(&self) -> &str {
        match self.cccd.as_deref().map(str::trim) {
            Some(cccd) if !cccd.is_empty() => cccd,
            _ => &self.ma_hocsinh,
        }
    }
}

/// Fully prepared row handed to the store; the password is already hashed.
#[derive(Debug, Clone)]
pub struct StudentDraft {
    pub ma_hocsinh: String,
    pub hoten: String,
    pub ngaysinh: String,
    pub lop: String,
    pub role: Role,
    pub must_change_password: bool,
    pub password_hash: String,
}

impl StudentDraft {
    pub(crate) fn into_student(self, id: i32) -> (Student, String) {
        let student = Student {
            id,
            ma_hocsinh: self.ma_hocsinh,
            hoten: self.hoten,
            ngaysinh: self.ngaysinh,
            lop: self.lop,
            role: self.role,
            must_change_password: self.must_change_password,
            review_subjects: Vec::new(),
            exam_subjects: Vec::new(),
            registration_date: None,
            custom_data: BTreeMap::new(),
        };
        (student, self.password_hash)
    }
}

/// A student's proposed registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub review_subjects: Vec<i32>,
    #[serde(default)]
    pub exam_subjects: Vec<i32>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
}

impl Submission {
    /// Drops repeated subject ids, keeping the first occurrence.
    pub fn dedup(mut self) -> Self {
        dedup_ids(&mut self.review_subjects);
        dedup_ids(&mut self.exam_subjects);
        self
    }
}

fn dedup_ids(ids: &mut Vec<i32>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i32,
    pub name: String,
}

impl Subject {
    fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomFieldType {
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: CustomFieldType,
    #[serde(default)]
    pub required: bool,
}

/// Which parts of the registration form are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToggles {
    pub show_review_subjects: bool,
    pub show_exam_subjects: bool,
    pub show_custom_fields: bool,
}

impl Default for RegistrationToggles {
    fn default() -> Self {
        Self {
            show_review_subjects: true,
            show_exam_subjects: true,
            show_custom_fields: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCatalog {
    pub review: Vec<Subject>,
    pub exam: Vec<Subject>,
}

/// Global registration settings. Always handled as a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSettings {
    pub is_registration_locked: bool,
    pub registration_deadline: DateTime<Utc>,
    #[serde(default)]
    pub registration_settings: RegistrationToggles,
    #[serde(default)]
    pub review_subjects: Vec<Subject>,
    #[serde(default)]
    pub exam_subjects: Vec<Subject>,
    #[serde(default)]
    pub custom_form_fields: Vec<CustomField>,
}

impl RegistrationSettings {
    /// Settings a fresh installation starts with: open for ten days.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            is_registration_locked: false,
            registration_deadline: now + Duration::days(10),
            registration_settings: RegistrationToggles::default(),
            review_subjects: vec![
                Subject::new(1, "Toán"),
                Subject::new(2, "Ngữ văn"),
                Subject::new(3, "Tiếng Anh"),
                Subject::new(4, "Vật lý"),
                Subject::new(5, "Hóa học"),
                Subject::new(6, "Sinh học"),
                Subject::new(7, "Lịch sử"),
                Subject::new(8, "Địa lý"),
                Subject::new(9, "GDCD"),
            ],
            exam_subjects: vec![
                Subject::new(4, "Vật lý"),
                Subject::new(5, "Hóa học"),
                Subject::new(6, "Sinh học"),
                Subject::new(7, "Lịch sử"),
                Subject::new(8, "Địa lý"),
                Subject::new(9, "GDCD"),
            ],
            custom_form_fields: vec![
                CustomField {
                    id: "phone".to_string(),
                    label: "SĐT Phụ huynh".to_string(),
                    field_type: CustomFieldType::Text,
                    required: true,
                },
                CustomField {
                    id: "address".to_string(),
                    label: "Địa chỉ nhà".to_string(),
                    field_type: CustomFieldType::Text,
                    required: false,
                },
            ],
        }
    }

    pub fn catalog(&self) -> SubjectCatalog {
        SubjectCatalog {
            review: self.review_subjects.clone(),
            exam: self.exam_subjects.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentSession {
    pub ssid: String,
    pub belongs_to: i32,
    pub expires_at: DateTime<Utc>,
}

impl StudentSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.gt(&self.expires_at)
    }
}
