//! Logout Use Case

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{SessionId, UserId};

use crate::domain::repository::SessionRepository;
use crate::error::AuthResult;

pub struct LogoutUseCase<R>
where
    R: SessionRepository,
{
    repo: Arc<R>,
}

impl<R> LogoutUseCase<R>
where
    R: SessionRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// End the current session. Ending an already closed session is a no-op.
    pub async fn execute(&self, user_id: UserId, session_id: SessionId) -> AuthResult<()> {
        let Some(mut session) = self
            .repo
            .find_session(session_id)
            .await?
            .filter(|s| s.user_id == user_id && s.is_active())
        else {
            return Ok(());
        };

        session.end("logout", Utc::now());
        self.repo.update_session(&session).await?;

        tracing::info!(user_id = %user_id, session_id = %session_id, "User logged out");
        Ok(())
    }

    /// End every active session of the user. Returns how many were ended.
    pub async fn execute_all(&self, user_id: UserId) -> AuthResult<u64> {
        let ended = end_sessions(&*self.repo, user_id, None, "logout_all").await?;
        tracing::info!(user_id = %user_id, sessions = ended, "User logged out everywhere");
        Ok(ended)
    }
}

/// End the active sessions of `user_id`, optionally sparing one
pub(crate) async fn end_sessions<R: SessionRepository>(
    repo: &R,
    user_id: UserId,
    except: Option<SessionId>,
    reason: &str,
) -> AuthResult<u64> {
    let now = Utc::now();
    let mut ended = 0;
    for mut session in repo.list_active_sessions(Some(user_id)).await? {
        if Some(session.id) == except {
            continue;
        }
        session.end(reason, now);
        repo.update_session(&session).await?;
        ended += 1;
    }
    Ok(ended)
}
