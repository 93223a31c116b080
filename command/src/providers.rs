//! Verification ports.
//!
//! Cryptographic verification of passwords, WebAuthn assertions, and TOTP
//! codes is owned by external collaborators. The command engine only needs
//! these seams; production wires real implementations, tests wire stubs.

use async_trait::async_trait;
use serde_json::json;

use garrison_core::{Error, Result};
use garrison_domain::session::WebAuthnChallenged;

/// Outcome of a verified WebAuthn assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebAuthnOutcome {
    /// Whether the authenticator verified the user (PIN, biometric).
    pub user_verified: bool,
}

/// Authenticator user-verification requirement requested with a challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserVerification {
    /// The authenticator must verify the user; assertions without
    /// verification are rejected.
    Required,
    /// Verification is requested but not enforced.
    #[default]
    Preferred,
    /// Verification is discouraged.
    Discouraged,
}

impl UserVerification {
    /// Wire form used in credential-request options.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

/// WebAuthn assertion ceremony, backed by a WebAuthn library out of scope
/// here.
pub trait WebAuthnVerifier: Send + Sync {
    /// Build the public credential-request options for a new challenge.
    ///
    /// # Errors
    ///
    /// Implementation-defined; the default cannot fail.
    fn request_options(
        &self,
        domain: &str,
        user_verification: UserVerification,
        challenge: &str,
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "publicKey": {
                "challenge": challenge,
                "rpId": domain,
                "userVerification": user_verification.as_str(),
            }
        }))
    }

    /// Verify an assertion against the stored challenge.
    ///
    /// # Errors
    ///
    /// Returns an error when the assertion does not prove possession for
    /// the challenged domain and nonce.
    fn verify_assertion(
        &self,
        challenge: &WebAuthnChallenged,
        assertion: &serde_json::Value,
    ) -> Result<WebAuthnOutcome>;
}

/// Password verification against the platform's secret store.
#[async_trait]
pub trait PasswordVerifier: Send + Sync {
    /// Verify `password` for `user_id` in `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the password does not match or the user has no
    /// password set.
    async fn verify(&self, instance_id: &str, user_id: &str, password: &str) -> Result<()>;
}

/// TOTP code verification against a user's enrolled secret.
pub trait TotpVerifier: Send + Sync {
    /// Verify `code` against the (encrypted) `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error when the code is not valid for the secret now.
    fn verify(&self, secret: &str, code: &str) -> Result<()>;
}

/// Placeholder wiring that fails every verification; replaced at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl WebAuthnVerifier for Unconfigured {
    fn verify_assertion(
        &self,
        _challenge: &WebAuthnChallenged,
        _assertion: &serde_json::Value,
    ) -> Result<WebAuthnOutcome> {
        Err(Error::internal(
            "COMMAND-webauthn-unconfigured",
            "no webauthn verifier configured",
        ))
    }
}

#[async_trait]
impl PasswordVerifier for Unconfigured {
    async fn verify(&self, _instance_id: &str, _user_id: &str, _password: &str) -> Result<()> {
        Err(Error::internal(
            "COMMAND-password-unconfigured",
            "no password verifier configured",
        ))
    }
}

impl TotpVerifier for Unconfigured {
    fn verify(&self, _secret: &str, _code: &str) -> Result<()> {
        Err(Error::internal(
            "COMMAND-totp-unconfigured",
            "no totp verifier configured",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_options_carry_challenge_domain_and_preference() {
        let options = Unconfigured
            .request_options("example.com", UserVerification::Required, "nonce")
            .unwrap();
        assert_eq!(options["publicKey"]["challenge"], "nonce");
        assert_eq!(options["publicKey"]["rpId"], "example.com");
        assert_eq!(options["publicKey"]["userVerification"], "required");
    }
}
