// Session establishment: principal extraction from the connect frame.
//
// Token issuance and verification live in front of the broker; what arrives
// here is the opaque principal identifier that layer minted. This module is
// the seam where a deployment substitutes real verification.

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("empty principal token")]
    EmptyToken,
}

#[derive(Debug, Default, Clone)]
pub struct PrincipalAuth;

impl PrincipalAuth {
    pub fn new() -> Self {
        Self
    }

    /// Map the opaque token to a client id. The authenticated principal is
    /// the subscriber identity everywhere downstream.
    pub fn authenticate(&self, token: &str) -> Result<String> {
        let principal = token.trim();
        if principal.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(principal.to_string())
    }
}
