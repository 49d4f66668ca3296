use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Single shared password for every login. Connection plumbing only, there
/// are no per-user roles.
#[derive(Debug)]
pub struct CarebookAuthSource {
    password: String,
}

impl CarebookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CarebookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "password requested");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
