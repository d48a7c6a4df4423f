//! SQLite persistence for accounts, selections and signer requests
//!
//! Every write is a whole-record upsert. Concurrent writers for the same key
//! resolve last-writer-wins.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{AccountSelection, ExternalAccount, Platform, SignerRequest, SignerState};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // External accounts
    // ------------------------------------------------------------------

    /// Insert or update an account keyed by (owner, platform, external_id).
    ///
    /// Returns the id of the stored row, which is the existing id when the
    /// external account was linked before.
    pub async fn upsert_account(&self, account: &ExternalAccount) -> Result<String> {
        let row = sqlx::query(
            r#"
            INSERT INTO external_accounts (
                id, owner, platform, external_id, display_name,
                encrypted_access_token, encrypted_refresh_token, token_expiry,
                is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner, platform, external_id) DO UPDATE SET
                display_name = excluded.display_name,
                encrypted_access_token = excluded.encrypted_access_token,
                encrypted_refresh_token = excluded.encrypted_refresh_token,
                token_expiry = excluded.token_expiry,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&account.id)
        .bind(&account.owner)
        .bind(account.platform.as_str())
        .bind(&account.external_id)
        .bind(&account.display_name)
        .bind(&account.encrypted_access_token)
        .bind(&account.encrypted_refresh_token)
        .bind(account.token_expiry)
        .bind(account.is_active)
        .bind(account.updated_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("id"))
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<ExternalAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, platform, external_id, display_name,
                   encrypted_access_token, encrypted_refresh_token, token_expiry,
                   is_active, updated_at
            FROM external_accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// All accounts of an owner, optionally narrowed to one platform
    pub async fn list_accounts(
        &self,
        owner: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<ExternalAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, platform, external_id, display_name,
                   encrypted_access_token, encrypted_refresh_token, token_expiry,
                   is_active, updated_at
            FROM external_accounts
            WHERE owner = ? AND (? IS NULL OR platform = ?)
            ORDER BY platform, display_name, id
            "#,
        )
        .bind(owner)
        .bind(platform.map(|p| p.as_str()))
        .bind(platform.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    pub async fn set_account_active(&self, account_id: &str, active: bool, now: i64) -> Result<()> {
        sqlx::query("UPDATE external_accounts SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Persist rotated tokens and mark the account active
    pub async fn update_account_tokens(
        &self,
        account_id: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        token_expiry: Option<i64>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE external_accounts
            SET encrypted_access_token = ?,
                encrypted_refresh_token = ?,
                token_expiry = ?,
                is_active = 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encrypted_access_token)
        .bind(encrypted_refresh_token)
        .bind(token_expiry)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Selections
    // ------------------------------------------------------------------

    pub async fn upsert_selection(
        &self,
        owner: &str,
        platform: Platform,
        account_id: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_selections (owner, platform, account_id, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (owner, platform) DO UPDATE SET
                account_id = excluded.account_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner)
        .bind(platform.as_str())
        .bind(account_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_selection(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Result<Option<AccountSelection>> {
        let row = sqlx::query(
            r#"
            SELECT owner, platform, account_id, updated_at
            FROM account_selections WHERE owner = ? AND platform = ?
            "#,
        )
        .bind(owner)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| AccountSelection {
            owner: r.get("owner"),
            platform,
            account_id: r.get("account_id"),
            updated_at: r.get("updated_at"),
        }))
    }

    pub async fn delete_selection(&self, owner: &str, platform: Platform) -> Result<()> {
        sqlx::query("DELETE FROM account_selections WHERE owner = ? AND platform = ?")
            .bind(owner)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// The selected account for (owner, platform), only if it is active
    pub async fn get_selected_account(
        &self,
        owner: &str,
        platform: Platform,
    ) -> Result<Option<ExternalAccount>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.owner, a.platform, a.external_id, a.display_name,
                   a.encrypted_access_token, a.encrypted_refresh_token, a.token_expiry,
                   a.is_active, a.updated_at
            FROM account_selections s
            JOIN external_accounts a ON a.id = s.account_id
            WHERE s.owner = ? AND s.platform = ?
              AND a.owner = s.owner AND a.platform = s.platform
              AND a.is_active = 1
            "#,
        )
        .bind(owner)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    // ------------------------------------------------------------------
    // Legacy single-account rows
    // ------------------------------------------------------------------

    pub async fn get_legacy_token(&self, owner: &str, platform: Platform) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT encrypted_access_token FROM legacy_accounts WHERE owner = ? AND platform = ?",
        )
        .bind(owner)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.get("encrypted_access_token")))
    }

    pub async fn upsert_legacy_token(
        &self,
        owner: &str,
        platform: Platform,
        encrypted_access_token: &str,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO legacy_accounts (owner, platform, encrypted_access_token, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (owner, platform) DO UPDATE SET
                encrypted_access_token = excluded.encrypted_access_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner)
        .bind(platform.as_str())
        .bind(encrypted_access_token)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Signer requests
    // ------------------------------------------------------------------

    /// Insert or overwrite the request for (owner, platform_identity).
    /// An overwritten request is effectively cancelled: its approval token
    /// stops resolving. An approved row is never overwritten.
    ///
    /// Returns whether the request was written.
    pub async fn upsert_signer_request(&self, request: &SignerRequest, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO signer_requests (
                owner, platform_identity, public_key, encrypted_private_key,
                approval_token, approval_link, state, expires_at, approved_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner, platform_identity) DO UPDATE SET
                public_key = excluded.public_key,
                encrypted_private_key = excluded.encrypted_private_key,
                approval_token = excluded.approval_token,
                approval_link = excluded.approval_link,
                state = excluded.state,
                expires_at = excluded.expires_at,
                approved_at = excluded.approved_at,
                updated_at = excluded.updated_at
            WHERE signer_requests.state <> 'approved'
            "#,
        )
        .bind(&request.owner)
        .bind(&request.platform_identity)
        .bind(&request.public_key)
        .bind(&request.encrypted_private_key)
        .bind(&request.approval_token)
        .bind(&request.approval_link)
        .bind(request.state.as_str())
        .bind(request.expires_at)
        .bind(request.approved_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_signer_request(
        &self,
        owner: &str,
        platform_identity: &str,
    ) -> Result<Option<SignerRequest>> {
        let row = sqlx::query(
            r#"
            SELECT owner, platform_identity, public_key, encrypted_private_key,
                   approval_token, approval_link, state, expires_at, approved_at
            FROM signer_requests WHERE owner = ? AND platform_identity = ?
            "#,
        )
        .bind(owner)
        .bind(platform_identity)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(signer_request_from_row).transpose()
    }

    pub async fn get_signer_request_by_token(
        &self,
        owner: &str,
        approval_token: &str,
    ) -> Result<Option<SignerRequest>> {
        let row = sqlx::query(
            r#"
            SELECT owner, platform_identity, public_key, encrypted_private_key,
                   approval_token, approval_link, state, expires_at, approved_at
            FROM signer_requests WHERE owner = ? AND approval_token = ?
            "#,
        )
        .bind(owner)
        .bind(approval_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(signer_request_from_row).transpose()
    }

    /// Move a request out of `pending`. The row is only touched while it is
    /// still pending and still carries `approval_token`, so terminal states
    /// never move and a superseded token cannot change the replacement.
    ///
    /// Returns whether a row was updated.
    pub async fn transition_signer_request(
        &self,
        owner: &str,
        approval_token: &str,
        state: SignerState,
        approved_at: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE signer_requests
            SET state = ?, approved_at = ?, updated_at = ?
            WHERE owner = ? AND approval_token = ? AND state = 'pending'
            "#,
        )
        .bind(state.as_str())
        .bind(approved_at)
        .bind(now)
        .bind(owner)
        .bind(approval_token)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }
}

fn account_from_row(row: &SqliteRow) -> Result<ExternalAccount> {
    let platform: String = row.try_get("platform").map_err(DbError::SqlxError)?;
    Ok(ExternalAccount {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        owner: row.try_get("owner").map_err(DbError::SqlxError)?,
        platform: platform.parse()?,
        external_id: row.try_get("external_id").map_err(DbError::SqlxError)?,
        display_name: row.try_get("display_name").map_err(DbError::SqlxError)?,
        encrypted_access_token: row
            .try_get("encrypted_access_token")
            .map_err(DbError::SqlxError)?,
        encrypted_refresh_token: row
            .try_get("encrypted_refresh_token")
            .map_err(DbError::SqlxError)?,
        token_expiry: row.try_get("token_expiry").map_err(DbError::SqlxError)?,
        is_active: row.try_get("is_active").map_err(DbError::SqlxError)?,
        updated_at: row.try_get("updated_at").map_err(DbError::SqlxError)?,
    })
}

fn signer_request_from_row(row: &SqliteRow) -> Result<SignerRequest> {
    let state: String = row.try_get("state").map_err(DbError::SqlxError)?;
    Ok(SignerRequest {
        owner: row.try_get("owner").map_err(DbError::SqlxError)?,
        platform_identity: row.try_get("platform_identity").map_err(DbError::SqlxError)?,
        public_key: row.try_get("public_key").map_err(DbError::SqlxError)?,
        encrypted_private_key: row
            .try_get("encrypted_private_key")
            .map_err(DbError::SqlxError)?,
        approval_token: row.try_get("approval_token").map_err(DbError::SqlxError)?,
        approval_link: row.try_get("approval_link").map_err(DbError::SqlxError)?,
        // CHECK constraint keeps this to the three known values
        state: SignerState::parse(&state).unwrap_or(SignerState::Expired),
        expires_at: row.try_get("expires_at").map_err(DbError::SqlxError)?,
        approved_at: row.try_get("approved_at").map_err(DbError::SqlxError)?,
    })
}
