//! User Entity
//!
//! Identity and global role. Secrets live in [`Credentials`](super::Credentials).

use chrono::{DateTime, Utc};
use kernel::id::UserId;

use crate::domain::value_object::{Acronym, Email, GlobalRole};

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub acronym: Acronym,
    pub nom: String,
    pub prenom: String,
    pub global_role: GlobalRole,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: Email, acronym: Acronym, nom: String, prenom: String) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email,
            acronym,
            nom,
            prenom,
            global_role: GlobalRole::User,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_role(mut self, role: GlobalRole) -> Self {
        self.global_role = role;
        self
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.prenom, self.nom).trim().to_string()
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
        self.updated_at = now;
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}
