//! Register Use Case
//!
//! Creates a user with the default global role and its credentials.

use std::sync::Arc;

use crate::application::config::AuthConfig;
use crate::domain::entity::{Credentials, User};
use crate::domain::repository::{CredentialsRepository, UserRepository};
use crate::domain::value_object::{Acronym, Email, RawPassword, UserPassword};
use crate::error::{AuthError, AuthResult};
use kernel::id::UserId;

/// Register input
pub struct RegisterInput {
    pub email: String,
    pub acronym: String,
    pub password: String,
    pub nom: String,
    pub prenom: String,
}

/// Register output
pub struct RegisterOutput {
    pub user_id: UserId,
    pub email: String,
    pub acronym: String,
}

/// Register use case
pub struct RegisterUseCase<R>
where
    R: UserRepository + CredentialsRepository,
{
    repo: Arc<R>,
    config: Arc<AuthConfig>,
}

impl<R> RegisterUseCase<R>
where
    R: UserRepository + CredentialsRepository,
{
    pub fn new(repo: Arc<R>, config: Arc<AuthConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn execute(&self, input: RegisterInput) -> AuthResult<RegisterOutput> {
        let email = Email::new(&input.email)?;
        let acronym = Acronym::new(&input.acronym)?;
        let nom = input.nom.trim().to_string();
        let prenom = input.prenom.trim().to_string();

        if self.repo.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }
        if self.repo.find_user_by_acronym(&acronym).await?.is_some() {
            return Err(AuthError::AcronymTaken);
        }

        // Validate and hash password
        let raw_password = RawPassword::new(input.password)?;
        raw_password.ensure_not_containing(&[
            email.local_part(),
            acronym.as_str(),
            nom.as_str(),
            prenom.as_str(),
        ])?;
        let password_hash = UserPassword::from_raw(&raw_password, self.config.pepper())?;

        let user = User::new(email, acronym, nom, prenom);
        let credentials = Credentials::new(user.id, password_hash);

        // Persist
        self.repo.insert_user(&user).await?;
        self.repo.insert_credentials(&credentials).await?;

        tracing::info!(
            user_id = %user.id,
            acronym = %user.acronym,
            "User registered"
        );

        Ok(RegisterOutput {
            user_id: user.id,
            email: user.email.to_string(),
            acronym: user.acronym.to_string(),
        })
    }
}
