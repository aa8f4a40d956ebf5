use chrono::Utc;

use crate::auth::hash_password;
use crate::models::{RegistrationSettings, Role, StudentDraft};
use crate::store::{Store, StoreError};
use crate::Error;

pub const ADMIN_CODE: &str = "admin";

/// Writes the default settings and the `admin` account when missing.
/// Existing data is left untouched, so this runs on every startup.
pub async fn ensure_seeded(store: &dyn Store, admin_password: &str) -> Result<(), Error> {
    match store.load().await {
        Ok(_) => {}
        Err(StoreError::NotFound) => {
            let settings = RegistrationSettings::initial(Utc::now());
            store.save(&settings).await?;
            log::info!(
                "seeded registration settings, deadline {}",
                settings.registration_deadline
            );
        }
        Err(err) => return Err(err.into()),
    }

    if store.find_by_code(ADMIN_CODE).await?.is_none() {
        let admin = store
            .insert(StudentDraft {
                ma_hocsinh: ADMIN_CODE.to_string(),
                hoten: "Administrator".to_string(),
                ngaysinh: String::new(),
                lop: "N/A".to_string(),
                role: Role::Admin,
                must_change_password: false,
                password_hash: hash_password(admin_password)?,
            })
            .await?;
        log::info!("created admin account #{}", admin.id);
    }
    Ok(())
}
