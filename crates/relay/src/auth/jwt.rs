use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    user_id: String,
    email: String,
    token_type: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// Identity carried by a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessIdentity {
    pub user_id: String,
    pub email: String,
}

/// Validates the HS256 access tokens minted by the account service.
#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(&self, user_id: &str, email: &str) -> anyhow::Result<String> {
        self.issue_token_at(user_id, email, ACCESS_TOKEN_TYPE, current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        user_id: &str,
        email: &str,
        token_type: &str,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            user_id: user_id.to_owned(),
            email: email.to_owned(),
            token_type: token_type.to_owned(),
            iat: issued_at,
            nbf: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<AccessIdentity> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            bail!("token type '{}' cannot be used for access", claims.token_type);
        }
        if claims.user_id.trim().is_empty() {
            bail!("access token has an empty user_id claim");
        }

        Ok(AccessIdentity { user_id: claims.user_id, email: claims.email })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS};

    const TEST_SECRET: &str = "watchroom_test_secret_that_is_definitely_long_enough";

    fn service() -> JwtAccessTokenService {
        JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize")
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn issues_and_validates_access_tokens() {
        let service = service();
        let token = service
            .issue_access_token("5f0c8a1e-user", "viewer@example.com")
            .expect("token should be issued");
        let identity = service.validate_access_token(&token).expect("token should validate");

        assert_eq!(identity.user_id, "5f0c8a1e-user");
        assert_eq!(identity.email, "viewer@example.com");
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = service();
        let token =
            service.issue_access_token("user-1", "a@example.com").expect("token should be issued");

        assert!(service.validate_access_token(&format!("{token}x")).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = service();
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service
            .issue_token_at("user-1", "a@example.com", "access", issued_at)
            .expect("token should be issued");

        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_refresh_tokens() {
        let service = service();
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let token = service
            .issue_token_at("user-1", "a@example.com", "refresh", now)
            .expect("token should be issued");

        let error = service.validate_access_token(&token).expect_err("refresh must be rejected");
        assert!(error.to_string().contains("refresh"));
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let other = JwtAccessTokenService::new("another_secret_that_is_also_long_enough!!")
            .expect("service should initialize");
        let token =
            other.issue_access_token("user-1", "a@example.com").expect("token should be issued");

        assert!(service().validate_access_token(&token).is_err());
    }
}
