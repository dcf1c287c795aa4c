use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Shared-secret password check. Who the caller is comes from the session
/// user name, resolved per query against the user directory.
///
/// The session user is self-asserted: anyone holding the shared password can
/// connect as any registered id, admins included. Only expose the listener to
/// trusted clients, and set `PARKSPOT_PASSWORD` away from its default.
#[derive(Debug)]
pub struct ParkspotAuthSource {
    password: String,
}

impl ParkspotAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ParkspotAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!("login attempt as {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
