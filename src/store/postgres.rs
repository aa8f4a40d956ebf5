use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::{CredentialStore, SettingsStore, StoreError, StudentFilter, StudentStore};
use crate::models::{
    RegistrationSettings, Role, Student, StudentDraft, StudentPatch, StudentSession,
};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS students (
        id INT PRIMARY KEY,
        ma_hocsinh TEXT UNIQUE NOT NULL,
        hoten TEXT NOT NULL,
        ngaysinh TEXT NOT NULL,
        lop TEXT NOT NULL,
        role TEXT NOT NULL,
        must_change_password BOOLEAN NOT NULL DEFAULT TRUE,
        review_subjects INT[] NOT NULL DEFAULT '{}',
        exam_subjects INT[] NOT NULL DEFAULT '{}',
        registration_date TIMESTAMPTZ,
        custom_data JSONB NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS passwords (
        student_id INT PRIMARY KEY REFERENCES students(id) ON DELETE CASCADE,
        password_hash TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_sessions (
        ssid TEXT PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL,
        belongs_to INT NOT NULL REFERENCES students(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS app_config (
        id INT PRIMARY KEY DEFAULT 1,
        config_data JSONB NOT NULL
    )",
];

#[derive(Debug, sqlx::FromRow)]
struct StudentRow {
    id: i32,
    ma_hocsinh: String,
    hoten: String,
    ngaysinh: String,
    lop: String,
    role: String,
    must_change_password: bool,
    review_subjects: Vec<i32>,
    exam_subjects: Vec<i32>,
    registration_date: Option<DateTime<Utc>>,
    custom_data: Json<BTreeMap<String, String>>,
}

impl TryFrom<StudentRow> for Student {
    type Error = StoreError;

    fn try_from(row: StudentRow) -> Result<Self, Self::Error> {
        Ok(Student {
            id: row.id,
            ma_hocsinh: row.ma_hocsinh,
            hoten: row.hoten,
            ngaysinh: row.ngaysinh,
            lop: row.lop,
            role: row.role.parse().map_err(StoreError::Unavailable)?,
            must_change_password: row.must_change_password,
            review_subjects: row.review_subjects,
            exam_subjects: row.exam_subjects,
            registration_date: row.registration_date,
            custom_data: row.custom_data.0,
        })
    }
}

fn conflict_on(code: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |err| match StoreError::from(err) {
        StoreError::Conflict(_) => StoreError::Conflict(code.to_string()),
        other => other,
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pg: PgPool,
}

impl PgStore {
    pub fn new(pg: PgPool) -> Self {
        Self { pg }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pg = PgPool::connect(url).await?;
        Ok(Self::new(pg))
    }

    /// Creates missing tables. Safe to run on every start.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pg).await?;
        }
        Ok(())
    }

    async fn insert_draft(
        tx: &mut Transaction<'_, Postgres>,
        draft: StudentDraft,
    ) -> Result<Student, StoreError> {
        let row = sqlx::query_as::<_, StudentRow>(
            "INSERT INTO students (id, ma_hocsinh, hoten, ngaysinh, lop, role, must_change_password)
             SELECT COALESCE(MAX(id), 0) + 1, $1, $2, $3, $4, $5, $6 FROM students
             RETURNING *",
        )
        .bind(&draft.ma_hocsinh)
        .bind(&draft.hoten)
        .bind(&draft.ngaysinh)
        .bind(&draft.lop)
        .bind(draft.role.as_str())
        .bind(draft.must_change_password)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_on(&draft.ma_hocsinh))?;

        sqlx::query("INSERT INTO passwords (student_id, password_hash) VALUES ($1, $2)")
            .bind(row.id)
            .bind(&draft.password_hash)
            .execute(&mut *tx)
            .await?;

        Student::try_from(row)
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn get(&self, id: i32) -> Result<Student, StoreError> {
        let row = sqlx::query_as::<_, StudentRow>("SELECT * FROM students WHERE id = $1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pg)
            .await?;
        row.ok_or(StoreError::NotFound).and_then(Student::try_from)
    }

    async fn find_by_code(&self, ma_hocsinh: &str) -> Result<Option<Student>, StoreError> {
        let row = sqlx::query_as::<_, StudentRow>(
            "SELECT * FROM students WHERE ma_hocsinh = $1 LIMIT 1",
        )
        .bind(ma_hocsinh)
        .fetch_optional(&self.pg)
        .await?;
        row.map(Student::try_from).transpose()
    }

    async fn put(&self, id: i32, patch: StudentPatch) -> Result<Student, StoreError> {
        let code = patch.ma_hocsinh.clone().unwrap_or_default();
        let row = sqlx::query_as::<_, StudentRow>(
            "UPDATE students SET
                ma_hocsinh = COALESCE($2, ma_hocsinh),
                hoten = COALESCE($3, hoten),
                ngaysinh = COALESCE($4, ngaysinh),
                lop = COALESCE($5, lop),
                must_change_password = COALESCE($6, must_change_password),
                review_subjects = COALESCE($7, review_subjects),
                exam_subjects = COALESCE($8, exam_subjects),
                custom_data = COALESCE($9, custom_data),
                registration_date = COALESCE($10, registration_date)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(patch.ma_hocsinh)
        .bind(patch.hoten)
        .bind(patch.ngaysinh)
        .bind(patch.lop)
        .bind(patch.must_change_password)
        .bind(patch.review_subjects)
        .bind(patch.exam_subjects)
        .bind(patch.custom_data.map(Json))
        .bind(patch.registration_date)
        .fetch_optional(&self.pg)
        .await
        .map_err(conflict_on(&code))?;
        row.ok_or(StoreError::NotFound).and_then(Student::try_from)
    }

    async fn list(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError> {
        let rows = sqlx::query_as::<_, StudentRow>(
            "SELECT * FROM students
             WHERE ($1::TEXT IS NULL OR role = $1)
               AND ($2::TEXT IS NULL OR lop = $2)
               AND ($3::TEXT IS NULL OR LOWER(hoten) LIKE $3 OR LOWER(ma_hocsinh) LIKE $3)
             ORDER BY hoten ASC",
        )
        .bind(filter.role.map(|role| role.as_str()))
        .bind(filter.class_name())
        .bind(filter.search_term().map(|term| format!("%{}%", term)))
        .fetch_all(&self.pg)
        .await?;
        rows.into_iter().map(Student::try_from).collect()
    }

    async fn delete(&self, ids: &[i32]) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM students WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pg)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert(&self, draft: StudentDraft) -> Result<Student, StoreError> {
        let mut tx = self.pg.begin().await?;
        let student = Self::insert_draft(&mut tx, draft).await?;
        tx.commit().await?;
        Ok(student)
    }

    async fn insert_batch(&self, drafts: Vec<StudentDraft>) -> Result<Vec<Student>, StoreError> {
        let mut tx = self.pg.begin().await?;
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(Self::insert_draft(&mut tx, draft).await?);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn delete_all_students(&self) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM students WHERE role = $1")
            .bind(Role::Student.as_str())
            .execute(&self.pg)
            .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load(&self) -> Result<RegistrationSettings, StoreError> {
        let row = sqlx::query_as::<_, (Json<RegistrationSettings>,)>(
            "SELECT config_data FROM app_config WHERE id = 1",
        )
        .fetch_optional(&self.pg)
        .await?;
        row.map(|(Json(settings),)| settings)
            .ok_or(StoreError::NotFound)
    }

    async fn save(&self, settings: &RegistrationSettings) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_config (id, config_data) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE SET config_data = EXCLUDED.config_data",
        )
        .bind(Json(settings))
        .execute(&self.pg)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn password_hash(&self, student_id: i32) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT password_hash FROM passwords WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pg)
        .await?;
        Ok(row.map(|(hash,)| hash))
    }

    async fn set_password_hash(&self, student_id: i32, hash: String) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO passwords (student_id, password_hash) VALUES ($1, $2)
             ON CONFLICT (student_id) DO UPDATE SET password_hash = EXCLUDED.password_hash",
        )
        .bind(student_id)
        .bind(hash)
        .execute(&self.pg)
        .await?;
        Ok(())
    }

    async fn create_session(&self, session: StudentSession) -> Result<(), StoreError> {
        let res = sqlx::query("INSERT INTO user_sessions VALUES($1, $2, $3)")
            .bind(&session.ssid)
            .bind(session.expires_at)
            .bind(session.belongs_to)
            .execute(&self.pg)
            .await?;
        if res.rows_affected() < 1 {
            return Err(StoreError::Unavailable(
                "Could not update session ids!".to_string(),
            ));
        }
        Ok(())
    }

    async fn find_session(&self, ssid: &str) -> Result<Option<StudentSession>, StoreError> {
        let session = sqlx::query_as::<_, StudentSession>(
            "SELECT * FROM user_sessions WHERE ssid = $1 LIMIT 1",
        )
        .bind(ssid)
        .fetch_optional(&self.pg)
        .await?;
        Ok(session)
    }

    async fn session_for(&self, student_id: i32) -> Result<Option<StudentSession>, StoreError> {
        let session = sqlx::query_as::<_, StudentSession>(
            "SELECT * FROM user_sessions WHERE belongs_to = $1 LIMIT 1",
        )
        .bind(student_id)
        .fetch_optional(&self.pg)
        .await?;
        Ok(session)
    }

    async fn drop_session(&self, ssid: &str, student_id: i32) -> Result<bool, StoreError> {
        let affected = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1 AND belongs_to = $2")
            .bind(ssid)
            .bind(student_id)
            .execute(&self.pg)
            .await?;
        Ok(affected.rows_affected() >= 1)
    }

    async fn drop_sessions_for(&self, student_id: i32) -> Result<u64, StoreError> {
        let affected = sqlx::query("DELETE FROM user_sessions WHERE belongs_to = $1")
            .bind(student_id)
            .execute(&self.pg)
            .await?;
        Ok(affected.rows_affected())
    }
}
