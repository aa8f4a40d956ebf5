use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CredentialStore, SettingsStore, StoreError, StudentFilter, StudentStore};
use crate::models::{
    RegistrationSettings, Role, Student, StudentDraft, StudentPatch, StudentSession,
};

/// Process-local store, used for demos and tests.
#[derive(Default)]
pub struct MemoryStore {
    students: RwLock<BTreeMap<i32, Student>>,
    passwords: RwLock<HashMap<i32, String>>,
    sessions: RwLock<HashMap<String, StudentSession>>,
    settings: RwLock<Option<RegistrationSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn forget(&self, ids: &[i32]) {
        let mut passwords = self.passwords.write().await;
        let mut sessions = self.sessions.write().await;
        for id in ids {
            passwords.remove(id);
        }
        sessions.retain(|_, session| !ids.contains(&session.belongs_to));
    }
}

fn code_taken(students: &BTreeMap<i32, Student>, code: &str, except: Option<i32>) -> bool {
    students
        .values()
        .any(|s| s.ma_hocsinh == code && Some(s.id) != except)
}

fn next_id(students: &BTreeMap<i32, Student>) -> i32 {
    students.keys().next_back().copied().unwrap_or(0) + 1
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn get(&self, id: i32) -> Result<Student, StoreError> {
        self.students
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_code(&self, ma_hocsinh: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .students
            .read()
            .await
            .values()
            .find(|s| s.ma_hocsinh == ma_hocsinh)
            .cloned())
    }

    async fn put(&self, id: i32, patch: StudentPatch) -> Result<Student, StoreError> {
        let mut students = self.students.write().await;
        if let Some(code) = &patch.ma_hocsinh {
            if code_taken(&students, code, Some(id)) {
                return Err(StoreError::Conflict(code.clone()));
            }
        }
        let student = students.get_mut(&id).ok_or(StoreError::NotFound)?;
        student.apply(patch);
        Ok(student.clone())
    }

    async fn list(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError> {
        let mut found: Vec<Student> = self
            .students
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.hoten.cmp(&b.hoten));
        Ok(found)
    }

    async fn delete(&self, ids: &[i32]) -> Result<u64, StoreError> {
        let removed = {
            let mut students = self.students.write().await;
            ids.iter().filter(|id| students.remove(*id).is_some()).count()
        };
        self.forget(ids).await;
        Ok(removed as u64)
    }

    async fn insert(&self, draft: StudentDraft) -> Result<Student, StoreError> {
        let mut students = self.students.write().await;
        if code_taken(&students, &draft.ma_hocsinh, None) {
            return Err(StoreError::Conflict(draft.ma_hocsinh));
        }
        let (student, hash) = draft.into_student(next_id(&students));
        students.insert(student.id, student.clone());
        self.passwords.write().await.insert(student.id, hash);
        Ok(student)
    }

    async fn insert_batch(&self, drafts: Vec<StudentDraft>) -> Result<Vec<Student>, StoreError> {
        let mut students = self.students.write().await;
        let mut staged = students.clone();
        let mut created = Vec::with_capacity(drafts.len());
        let mut hashes = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if code_taken(&staged, &draft.ma_hocsinh, None) {
                return Err(StoreError::Conflict(draft.ma_hocsinh));
            }
            let (student, hash) = draft.into_student(next_id(&staged));
            staged.insert(student.id, student.clone());
            hashes.push((student.id, hash));
            created.push(student);
        }
        *students = staged;
        self.passwords.write().await.extend(hashes);
        Ok(created)
    }

    async fn delete_all_students(&self) -> Result<u64, StoreError> {
        let removed: Vec<i32> = {
            let mut students = self.students.write().await;
            let ids = students
                .values()
                .filter(|s| s.role == Role::Student)
                .map(|s| s.id)
                .collect::<Vec<_>>();
            for id in &ids {
                students.remove(id);
            }
            ids
        };
        self.forget(&removed).await;
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<RegistrationSettings, StoreError> {
        self.settings
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotFound)
    }

    async fn save(&self, settings: &RegistrationSettings) -> Result<(), StoreError> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn password_hash(&self, student_id: i32) -> Result<Option<String>, StoreError> {
        Ok(self.passwords.read().await.get(&student_id).cloned())
    }

    async fn set_password_hash(&self, student_id: i32, hash: String) -> Result<(), StoreError> {
        if !self.students.read().await.contains_key(&student_id) {
            return Err(StoreError::NotFound);
        }
        self.passwords.write().await.insert(student_id, hash);
        Ok(())
    }

    async fn create_session(&self, session: StudentSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.ssid.clone(), session);
        Ok(())
    }

    async fn find_session(&self, ssid: &str) -> Result<Option<StudentSession>, StoreError> {
        Ok(self.sessions.read().await.get(ssid).cloned())
    }

    async fn session_for(&self, student_id: i32) -> Result<Option<StudentSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|session| session.belongs_to == student_id)
            .cloned())
    }

    async fn drop_session(&self, ssid: &str, student_id: i32) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let owned = sessions
            .get(ssid)
            .map(|session| session.belongs_to == student_id)
            .unwrap_or(false);
        if owned {
            sessions.remove(ssid);
        }
        Ok(owned)
    }

    async fn drop_sessions_for(&self, student_id: i32) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.belongs_to != student_id);
        Ok((before - sessions.len()) as u64)
    }
}
