//! The token read model backing API authentication.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use garrison_core::{Error, Result};

/// Table maintained by the token projection.
pub const TOKEN_TABLE: &str = "auth_tokens";

/// Column names of [`TOKEN_TABLE`], shared between the projection's
/// statements and the queries so they cannot drift apart.
pub mod columns {
    /// Tenant.
    pub const INSTANCE_ID: &str = "instance_id";
    /// Token id; with the instance, the primary key.
    pub const TOKEN_ID: &str = "token_id";
    /// Creation time.
    pub const CREATION_DATE: &str = "creation_date";
    /// Last change time.
    pub const CHANGE_DATE: &str = "change_date";
    /// Org owning the token's user.
    pub const RESOURCE_OWNER: &str = "resource_owner";
    /// The user the token authenticates.
    pub const USER_ID: &str = "user_id";
    /// OIDC client the token was issued to.
    pub const APPLICATION_ID: &str = "application_id";
    /// Browser/device the token belongs to.
    pub const USER_AGENT_ID: &str = "user_agent_id";
    /// Audience.
    pub const AUDIENCE: &str = "audience";
    /// Granted scopes.
    pub const SCOPES: &str = "scopes";
    /// Expiry.
    pub const EXPIRATION: &str = "expiration";
    /// Cached BCP-47 language tag of the user.
    pub const PREFERRED_LANGUAGE: &str = "preferred_language";
    /// Refresh token that minted this token.
    pub const REFRESH_TOKEN_ID: &str = "refresh_token_id";
    /// Whether the row is a personal access token.
    pub const IS_PAT: &str = "is_pat";
}

/// Key columns of the token table.
pub const TOKEN_KEY: &[&str] = &[columns::INSTANCE_ID, columns::TOKEN_ID];

/// Setup DDL of the token projection.
pub const TOKEN_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS auth_tokens (
    instance_id        TEXT        NOT NULL,
    token_id           TEXT        NOT NULL,
    creation_date      TIMESTAMPTZ NOT NULL,
    change_date        TIMESTAMPTZ NOT NULL,
    resource_owner     TEXT        NOT NULL,
    user_id            TEXT        NOT NULL,
    application_id     TEXT        NOT NULL DEFAULT '',
    user_agent_id      TEXT        NOT NULL DEFAULT '',
    audience           TEXT[]      NOT NULL DEFAULT '{}',
    scopes             TEXT[]      NOT NULL DEFAULT '{}',
    expiration         TIMESTAMPTZ NOT NULL,
    preferred_language TEXT        NOT NULL DEFAULT '',
    refresh_token_id   TEXT,
    is_pat             BOOLEAN     NOT NULL DEFAULT FALSE,

    PRIMARY KEY (instance_id, token_id)
);
CREATE INDEX IF NOT EXISTS auth_tokens_user_idx
    ON auth_tokens (instance_id, user_id);
CREATE INDEX IF NOT EXISTS auth_tokens_application_idx
    ON auth_tokens (instance_id, application_id);
CREATE INDEX IF NOT EXISTS auth_tokens_owner_idx
    ON auth_tokens (instance_id, resource_owner);
";

/// One materialised token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRow {
    /// Token id.
    pub token_id: String,
    /// Tenant.
    pub instance_id: String,
    /// The user the token authenticates.
    pub user_id: String,
    /// Org owning the user.
    pub resource_owner: String,
    /// OIDC client the token was issued to; empty for PATs.
    pub application_id: String,
    /// Browser/device the token belongs to.
    pub user_agent_id: String,
    /// Audience.
    pub audience: Vec<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Expiry.
    pub expiration: DateTime<Utc>,
    /// Cached language of the user.
    pub preferred_language: String,
    /// Refresh token that minted this token.
    pub refresh_token_id: Option<String>,
    /// Whether the row is a personal access token.
    pub is_pat: bool,
}

/// Queries over the token table.
#[derive(Clone)]
pub struct TokenQueries {
    pool: PgPool,
}

impl TokenQueries {
    /// Queries over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A token by id, or `None`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on database failure.
    pub async fn token_by_id(
        &self,
        instance_id: &str,
        token_id: &str,
    ) -> Result<Option<TokenRow>> {
        let row = sqlx::query(
            "SELECT token_id, instance_id, user_id, resource_owner, application_id,
                    user_agent_id, audience, scopes, expiration, preferred_language,
                    refresh_token_id, is_pat
             FROM auth_tokens
             WHERE instance_id = $1 AND token_id = $2",
        )
        .bind(instance_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::internal("TOKEN-query", e.to_string()))?;

        Ok(row.map(|row| TokenRow {
            token_id: row.get("token_id"),
            instance_id: row.get("instance_id"),
            user_id: row.get("user_id"),
            resource_owner: row.get("resource_owner"),
            application_id: row.get("application_id"),
            user_agent_id: row.get("user_agent_id"),
            audience: row.get("audience"),
            scopes: row.get("scopes"),
            expiration: row.get("expiration"),
            preferred_language: row.get("preferred_language"),
            refresh_token_id: row.get("refresh_token_id"),
            is_pat: row.get("is_pat"),
        }))
    }

    /// A token by id that is not expired, or `None`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on database failure.
    pub async fn active_token_by_id(
        &self,
        instance_id: &str,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenRow>> {
        Ok(self
            .token_by_id(instance_id, token_id)
            .await?
            .filter(|token| token.expiration > now))
    }
}
