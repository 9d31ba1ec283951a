use crate::backend::IdentityProvider;
use crate::errors::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_username(&self) -> SessionResult<String> {
        let name = whoami::username();
        if name.trim().is_empty() {
            return Err(SessionError::Validation(
                "unable to determine the current user name".into(),
            ));
        }
        Ok(name)
    }
}
