//! Persistence seams. Every backend implements all three traits and is
//! picked once at startup; handlers only ever see `Arc<dyn Store>`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::models::{
    RegistrationSettings, Role, Student, StudentDraft, StudentPatch, StudentSession,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("student code `{0}` is already taken")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                StoreError::NotFound
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Narrows a student listing. Empty strings count as "no filter".
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub class: Option<String>,
}

impl StudentFilter {
    pub fn students() -> Self {
        Self {
            role: Some(Role::Student),
            ..Self::default()
        }
    }

    pub(crate) fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }

    pub(crate) fn class_name(&self) -> Option<&str> {
        self.class.as_deref().filter(|class| !class.is_empty())
    }

    pub fn matches(&self, student: &Student) -> bool {
        if let Some(role) = self.role {
            if student.role != role {
                return false;
            }
        }
        if let Some(class) = self.class_name() {
            if student.lop != class {
                return false;
            }
        }
        if let Some(term) = self.search_term() {
            return student.hoten.to_lowercase().contains(&term)
                || student.ma_hocsinh.to_lowercase().contains(&term);
        }
        true
    }
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn get(&self, id: i32) -> Result<Student, StoreError>;
    async fn find_by_code(&self, ma_hocsinh: &str) -> Result<Option<Student>, StoreError>;
    async fn put(&self, id: i32, patch: StudentPatch) -> Result<Student, StoreError>;
    /// Students matching `filter`, ordered by name.
    async fn list(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError>;
    /// Deletes the given students with their credentials and sessions.
    async fn delete(&self, ids: &[i32]) -> Result<u64, StoreError>;
    async fn insert(&self, draft: StudentDraft) -> Result<Student, StoreError>;
    /// All-or-nothing insert of several students.
    async fn insert_batch(&self, drafts: Vec<StudentDraft>) -> Result<Vec<Student>, StoreError>;
    /// Removes every student account, keeping admins.
    async fn delete_all_students(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<RegistrationSettings, StoreError>;
    async fn save(&self, settings: &RegistrationSettings) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn password_hash(&self, student_id: i32) -> Result<Option<String>, StoreError>;
    async fn set_password_hash(&self, student_id: i32, hash: String) -> Result<(), StoreError>;
    async fn create_session(&self, session: StudentSession) -> Result<(), StoreError>;
    async fn find_session(&self, ssid: &str) -> Result<Option<StudentSession>, StoreError>;
    async fn session_for(&self, student_id: i32) -> Result<Option<StudentSession>, StoreError>;
    async fn drop_session(&self, ssid: &str, student_id: i32) -> Result<bool, StoreError>;
    async fn drop_sessions_for(&self, student_id: i32) -> Result<u64, StoreError>;
}

pub trait Store: StudentStore + SettingsStore + CredentialStore {}

impl<T> Store for T where T: StudentStore + SettingsStore + CredentialStore {}
