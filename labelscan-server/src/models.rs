use anyhow::Result;
use labelscan::UserProfile;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::auth::password::{hash_password, verify_password};
use crate::database::{Database, FromRow};

pub fn sqlite_current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Treat blank form fields as absent.
fn non_blank(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_on: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub allergies: Option<String>,
    pub dietary_preferences: Option<String>,
    pub chronic_conditions: Option<String>,
    pub medications: Option<String>,
    pub medical_history: Option<String>,
    pub onboarding_complete: bool,
    pub last_login: Option<String>,
}

impl FromRow for User {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            created_on: row.get("created_on")?,
            age: row.get("age")?,
            gender: row.get("gender")?,
            allergies: row.get("allergies")?,
            dietary_preferences: row.get("dietary_preferences")?,
            chronic_conditions: row.get("chronic_conditions")?,
            medications: row.get("medications")?,
            medical_history: row.get("medical_history")?,
            onboarding_complete: row.get("onboarding_complete")?,
            last_login: row.get("last_login")?,
        })
    }
}

/// The registration form, as posted.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RegisterForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// The onboarding form, as posted. Every field may be left blank.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct OnboardingForm {
    pub age: String,
    pub gender: String,
    pub allergies: String,
    pub dietary_preferences: String,
    pub chronic_conditions: String,
    pub medications: String,
    pub medical_history: String,
}

#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid input. Password must be at least 6 characters.")]
    InvalidInput,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Email already registered.")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl User {
    pub fn get_by_id(db: &Database, user_id: i64) -> Result<Option<User>> {
        Ok(db
            .collect_rows("SELECT * FROM User WHERE user_id = ?", params![user_id])?
            .pop())
    }

    pub fn get_by_email(db: &Database, email: &str) -> Result<Option<User>> {
        Ok(db
            .collect_rows(
                "SELECT * FROM User WHERE email = ? COLLATE NOCASE",
                params![email.trim()],
            )?
            .pop())
    }

    /// Create an account, returning its id.
    pub fn register(db: &Database, form: &RegisterForm) -> Result<i64, RegistrationError> {
        let email = form.email.trim();
        if email.is_empty() || form.password.len() < 6 {
            return Err(RegistrationError::InvalidInput);
        }
        if form.password != form.confirm_password {
            return Err(RegistrationError::PasswordMismatch);
        }
        if Self::get_by_email(db, email)?.is_some() {
            return Err(RegistrationError::EmailTaken);
        }
        let conn = db.pool.get().map_err(anyhow::Error::from)?;
        conn.execute(
            "INSERT INTO User (first_name, last_name, email, password_hash, created_on)
            VALUES (?, ?, ?, ?, ?)",
            params![
                form.first_name.trim(),
                form.last_name.trim(),
                email,
                hash_password(&form.password),
                sqlite_current_timestamp()
            ],
        )
        .map_err(anyhow::Error::from)?;
        let user_id = conn.last_insert_rowid();
        tracing::info!(user_id, "Registered new user");
        Ok(user_id)
    }

    /// Check an email and password, and record the login if they match.
    pub fn authenticate(db: &Database, email: &str, password: &str) -> Result<Option<User>> {
        let Some(mut user) = Self::get_by_email(db, email)? else {
            return Ok(None);
        };
        if !verify_password(password, &user.password_hash) {
            return Ok(None);
        }
        let now = sqlite_current_timestamp();
        db.pool.get()?.execute(
            "UPDATE User SET last_login = ? WHERE user_id = ?",
            params![now, user.user_id],
        )?;
        user.last_login = Some(now);
        Ok(Some(user))
    }

    /// Store the onboarding answers and mark onboarding as done.
    pub fn complete_onboarding(db: &Database, user_id: i64, form: &OnboardingForm) -> Result<()> {
        let age = match non_blank(&form.age) {
            Some(age) => Some(age.parse::<i64>()?),
            None => None,
        };
        db.pool.get()?.execute(
            "UPDATE User SET
                age = ?, gender = ?, allergies = ?, dietary_preferences = ?,
                chronic_conditions = ?, medications = ?, medical_history = ?,
                onboarding_complete = 1
            WHERE user_id = ?",
            params![
                age,
                non_blank(&form.gender),
                non_blank(&form.allergies),
                non_blank(&form.dietary_preferences),
                non_blank(&form.chronic_conditions),
                non_blank(&form.medications),
                non_blank(&form.medical_history),
                user_id
            ],
        )?;
        Ok(())
    }

    /// The part of the account the scan pipeline reads.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            allergies: self.allergies.clone(),
            chronic_conditions: self.chronic_conditions.clone(),
            dietary_preferences: self.dietary_preferences.clone(),
            medications: self.medications.clone(),
        }
    }
}
