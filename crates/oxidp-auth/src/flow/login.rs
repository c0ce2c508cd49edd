//! Credential verification for the login and MFA steps.
//!
//! The login UI itself lives elsewhere; this service is what its form
//! posts hit. A submitted credential is checked against the challenge
//! store (OTP, magic link, WebAuthn assertion digest) in one atomic
//! consume - the first submission wins, every retry of the same challenge
//! reads as invalid.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{info, warn};

use oxidp_core::clock::Clock;
use oxidp_core::token::{generate_token, sha256_hex};
use oxidp_store::{ChallengeStore, SessionAttrs, SessionStore, StoreError};

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::flow::engine::AuthenticatedUser;

/// A completed login: the session to set and the authenticated user.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    /// Session id for the browser cookie.
    pub session_id: String,

    /// The authenticated user, ready for the flow engine.
    pub user: AuthenticatedUser,
}

/// Verifies challenges and mints sessions.
pub struct LoginService {
    challenges: Arc<ChallengeStore>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl LoginService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        challenges: Arc<ChallengeStore>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            challenges,
            sessions,
            clock,
            config,
        }
    }

    /// Verifies a submitted credential against its stored challenge and
    /// opens a session.
    ///
    /// The challenge key is `{challenge_type}:{session_key}`. Every failure
    /// mode - unknown, expired, already consumed, wrong secret - reads as
    /// the same invalid-code error.
    pub async fn verify_challenge(
        &self,
        tenant_id: &str,
        challenge_type: &str,
        session_key: &str,
        secret: &str,
    ) -> AuthResult<LoginSuccess> {
        let id = format!("{challenge_type}:{session_key}");
        let record = match self.challenges.consume_atomic(&id, challenge_type).await {
            Ok(record) => record,
            Err(StoreError::AlreadyConsumed { .. }) => {
                warn!(challenge_type, "challenge replayed");
                return Err(invalid_code());
            }
            Err(_) => return Err(invalid_code()),
        };

        let presented = sha256_hex(secret);
        if record
            .challenge_hash
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .unwrap_u8()
            != 1
        {
            // The challenge is consumed either way; a wrong guess burns it.
            warn!(challenge_type, "challenge secret mismatch");
            return Err(invalid_code());
        }

        let user_id = record
            .user_id
            .ok_or_else(|| AuthError::internal("challenge without user binding"))?;

        let session_id = generate_token(32);
        let session = self
            .sessions
            .create(
                &session_id,
                &user_id,
                tenant_id,
                self.config.session_absolute_ttl_secs.saturating_mul(1_000),
                self.config.session_idle_ttl_secs.saturating_mul(1_000),
                SessionAttrs {
                    amr: vec![challenge_type.to_string()],
                    acr: None,
                },
            )
            .await;

        info!(challenge_type, "login challenge verified");
        Ok(LoginSuccess {
            session_id,
            user: AuthenticatedUser {
                user_id: session.user_id.clone(),
                sub: session.user_id,
                auth_time: self.clock.now_ms() / 1_000,
                amr: session.amr,
                acr: session.acr,
            },
        })
    }

    /// Verifies a second factor for an existing session, accumulating its
    /// method into the session's `amr`.
    pub async fn verify_second_factor(
        &self,
        session_id: &str,
        challenge_type: &str,
        session_key: &str,
        secret: &str,
    ) -> AuthResult<AuthenticatedUser> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(|_| AuthError::access_denied("no active session"))?;

        let id = format!("{challenge_type}:{session_key}");
        let record = self
            .challenges
            .consume_atomic(&id, challenge_type)
            .await
            .map_err(|_| invalid_code())?;

        let presented = sha256_hex(secret);
        if record
            .challenge_hash
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .unwrap_u8()
            != 1
        {
            return Err(invalid_code());
        }
        if record.user_id.as_deref() != Some(session.user_id.as_str()) {
            return Err(invalid_code());
        }

        let mut amr = session.amr.clone();
        if !amr.iter().any(|m| m == challenge_type) {
            amr.push(challenge_type.to_string());
        }

        Ok(AuthenticatedUser {
            user_id: session.user_id.clone(),
            sub: session.user_id,
            auth_time: session.created_at / 1_000,
            amr,
            acr: session.acr,
        })
    }
}

fn invalid_code() -> AuthError {
    AuthError::access_denied("invalid or expired code")
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidp_core::clock::ManualClock;
    use serde_json::json;

    const NOW_MS: u64 = 1_700_000_000_000;

    async fn service() -> (LoginService, Arc<ChallengeStore>, Arc<SessionStore>) {
        let clock = ManualClock::shared(NOW_MS);
        let challenges = Arc::new(ChallengeStore::new(16, clock.clone()).unwrap());
        let sessions = Arc::new(SessionStore::new(16, clock.clone()).unwrap());
        (
            LoginService::new(
                challenges.clone(),
                sessions.clone(),
                clock,
                AuthConfig::new("https://op.example"),
            ),
            challenges,
            sessions,
        )
    }

    #[tokio::test]
    async fn test_otp_login_opens_session() {
        let (service, challenges, sessions) = service().await;
        challenges
            .store(
                "otp:sess-key",
                "otp",
                Some("user-1"),
                &sha256_hex("123456"),
                300_000,
                Some("u@example.com"),
                json!({}),
            )
            .await;

        let success = service
            .verify_challenge("default", "otp", "sess-key", "123456")
            .await
            .unwrap();
        assert_eq!(success.user.user_id, "user-1");
        assert_eq!(success.user.amr, vec!["otp".to_string()]);

        let session = sessions.get(&success.session_id).await.unwrap();
        assert_eq!(session.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_first_submission_wins() {
        let (service, challenges, _sessions) = service().await;
        challenges
            .store(
                "magic_link:k",
                "magic_link",
                Some("user-1"),
                &sha256_hex("token"),
                300_000,
                None,
                json!({}),
            )
            .await;

        assert!(
            service
                .verify_challenge("default", "magic_link", "k", "token")
                .await
                .is_ok()
        );
        // Idempotent-terminal: any replay is an invalid code.
        assert!(
            service
                .verify_challenge("default", "magic_link", "k", "token")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_burns_challenge() {
        let (service, challenges, _sessions) = service().await;
        challenges
            .store(
                "otp:k",
                "otp",
                Some("user-1"),
                &sha256_hex("123456"),
                300_000,
                None,
                json!({}),
            )
            .await;

        assert!(
            service
                .verify_challenge("default", "otp", "k", "000000")
                .await
                .is_err()
        );
        // The guess consumed the challenge; the right code is now dead too.
        assert!(
            service
                .verify_challenge("default", "otp", "k", "123456")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_second_factor_accumulates_amr() {
        let (service, challenges, _sessions) = service().await;
        challenges
            .store(
                "otp:login",
                "otp",
                Some("user-1"),
                &sha256_hex("111111"),
                300_000,
                None,
                json!({}),
            )
            .await;
        let login = service
            .verify_challenge("default", "otp", "login", "111111")
            .await
            .unwrap();

        challenges
            .store(
                "webauthn:mfa",
                "webauthn",
                Some("user-1"),
                &sha256_hex("assertion-digest"),
                300_000,
                None,
                json!({}),
            )
            .await;
        let user = service
            .verify_second_factor(&login.session_id, "webauthn", "mfa", "assertion-digest")
            .await
            .unwrap();
        assert_eq!(
            user.amr,
            vec!["otp".to_string(), "webauthn".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_factor_requires_matching_user() {
        let (service, challenges, _sessions) = service().await;
        challenges
            .store(
                "otp:login",
                "otp",
                Some("user-1"),
                &sha256_hex("111111"),
                300_000,
                None,
                json!({}),
            )
            .await;
        let login = service
            .verify_challenge("default", "otp", "login", "111111")
            .await
            .unwrap();

        challenges
            .store(
                "otp:mfa",
                "otp",
                Some("someone-else"),
                &sha256_hex("222222"),
                300_000,
                None,
                json!({}),
            )
            .await;
        assert!(
            service
                .verify_second_factor(&login.session_id, "otp", "mfa", "222222")
                .await
                .is_err()
        );
    }
}
