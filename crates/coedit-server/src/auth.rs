//! Authentication and authorization hooks
//!
//! The coordinator only needs a token-verification hook plus per-document
//! access gates; hosts swap in their own implementation.

use crate::error::ServerError;
use async_trait::async_trait;
use coedit_common::{ClientId, DocumentId};
use coedit_protocol::ClientInfo;

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Verify a token and produce the client's identity.
    async fn verify(
        &self,
        client_id: &ClientId,
        token: Option<&str>,
    ) -> Result<ClientInfo, ServerError>;

    /// May the client join and read this document?
    async fn can_access(&self, _client: &ClientInfo, _document_id: &DocumentId) -> bool {
        true
    }

    /// May the client submit operations to this document?
    async fn can_edit(&self, _client: &ClientInfo, _document_id: &DocumentId) -> bool {
        true
    }
}

/// Accepts everyone; used when authentication is disabled.
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthService for NoAuth {
    async fn verify(
        &self,
        client_id: &ClientId,
        _token: Option<&str>,
    ) -> Result<ClientInfo, ServerError> {
        Ok(ClientInfo::anonymous(client_id.clone()))
    }
}

/// Token must equal the configured shared secret.
#[derive(Debug)]
pub struct SharedSecretAuth {
    secret: String,
}

impl SharedSecretAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl AuthService for SharedSecretAuth {
    async fn verify(
        &self,
        client_id: &ClientId,
        token: Option<&str>,
    ) -> Result<ClientInfo, ServerError> {
        match token {
            Some(token) if token == self.secret => Ok(ClientInfo::anonymous(client_id.clone())),
            Some(_) => Err(ServerError::Unauthorized("invalid token".into())),
            None => Err(ServerError::Unauthorized("token required".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientId {
        ClientId::new_unchecked("c1")
    }

    #[tokio::test]
    async fn no_auth_accepts_anyone() {
        let auth = NoAuth;
        let info = auth.verify(&client(), None).await.unwrap();
        assert_eq!(info.client_id, client());
    }

    #[tokio::test]
    async fn shared_secret_checks_token() {
        let auth = SharedSecretAuth::new("s3cret");
        assert!(auth.verify(&client(), Some("s3cret")).await.is_ok());
        assert!(matches!(
            auth.verify(&client(), Some("wrong")).await,
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            auth.verify(&client(), None).await,
            Err(ServerError::Unauthorized(_))
        ));
    }
}
