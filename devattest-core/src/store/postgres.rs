//! PostgreSQL stores
//!
//! Atomic consume is a single `DELETE ... RETURNING` statement, so concurrent
//! consumers of the same token race inside the database and exactly one row
//! is returned.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Challenge, ChallengeStore, ConsumedChallenge, DeviceKeyStore, StoreError};

/// Connect and run the bundled migrations.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPool::connect(database_url)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    tracing::info!("Connected to PostgreSQL database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    tracing::info!("Database migrations completed");

    Ok(pool)
}

/// Challenge store backed by the `attestation_challenges` table.
#[derive(Debug, Clone)]
pub struct PostgresChallengeStore {
    pool: PgPool,
}

impl PostgresChallengeStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PostgresChallengeStore {
    async fn create(&self, challenge: Challenge) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO attestation_challenges (id, raw_challenge, platform, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(challenge.token)
        .bind(&challenge.raw_bytes)
        .bind(challenge.platform.as_str())
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, token: Uuid) -> Result<Option<ConsumedChallenge>, StoreError> {
        let row: Option<(Vec<u8>, String)> = sqlx::query_as(
            r#"
            DELETE FROM attestation_challenges
            WHERE id = $1 AND expires_at > NOW()
            RETURNING raw_challenge, platform
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row.map(|(raw_bytes, platform)| ConsumedChallenge {
            raw_bytes,
            platform,
        }))
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM attestation_challenges WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!(removed, "Removed expired attestation challenges");
        }
        Ok(removed)
    }
}

/// Device key store backed by the `app_attest_keys` table.
#[derive(Debug, Clone)]
pub struct PostgresDeviceKeyStore {
    pool: PgPool,
}

impl PostgresDeviceKeyStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceKeyStore for PostgresDeviceKeyStore {
    async fn lookup(&self, key_id: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT public_key FROM app_attest_keys WHERE key_id = $1")
                .bind(key_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.map(|(public_key,)| public_key))
    }

    async fn save(&self, key_id: &[u8], public_key_der: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO app_attest_keys (key_id, public_key, created_at, last_seen)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (key_id) DO UPDATE SET
                public_key = EXCLUDED.public_key,
                last_seen = NOW()
            "#,
        )
        .bind(key_id)
        .bind(public_key_der)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}
