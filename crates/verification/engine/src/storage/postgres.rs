//! PostgreSQL storage implementation

use super::ensure_frozen_unchanged;
use super::traits::*;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgExecutor, PgPool, Row};
use std::time::Duration;
use verification_types::{
    AuditEntry, DocumentRef, EntityType, Policy, PolicyId, PolicyKey, PolicyVersion, RequestId,
    StorageError, SubjectType, VerificationRequest, VersionRef,
};

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS verification_policies (
                id TEXT PRIMARY KEY,
                branch_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                document_name TEXT NOT NULL,
                revision BIGINT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS verification_policies_scope ON verification_policies(branch_id, entity_type);"#,
            r#"
            CREATE TABLE IF NOT EXISTS policy_versions (
                policy_id TEXT NOT NULL,
                version_id BIGINT NOT NULL,
                data JSONB NOT NULL,
                activated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (policy_id, version_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS active_policy_versions (
                branch_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                document_name TEXT NOT NULL,
                policy_id TEXT NOT NULL,
                version_id BIGINT NOT NULL,
                PRIMARY KEY (branch_id, entity_type, document_name)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS verification_requests (
                id TEXT PRIMARY KEY,
                document_ref TEXT NOT NULL,
                state TEXT NOT NULL,
                revision BIGINT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS verification_requests_document_ref ON verification_requests(document_ref);"#,
            r#"CREATE INDEX IF NOT EXISTS verification_requests_state ON verification_requests(state);"#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                sequence BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                subject_type TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                action TEXT NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS audit_entries_subject ON audit_entries(subject_type, subject_id, sequence);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(Self::query_error)?;
        }

        Ok(())
    }

    fn query_error(e: sqlx::Error) -> StorageError {
        let unique_violation = e
            .as_database_error()
            .map_or(false, |db| db.is_unique_violation());
        if unique_violation {
            StorageError::Conflict(e.to_string())
        } else {
            StorageError::Unavailable(e.to_string())
        }
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StorageError> {
        serde_json::to_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StorageError> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn to_i64(value: u64) -> Result<i64, StorageError> {
        i64::try_from(value)
            .map_err(|_| StorageError::InvalidData(format!("{} does not fit BIGINT", value)))
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        rows: Vec<sqlx::postgres::PgRow>,
    ) -> StorageResult<Vec<T>> {
        rows.into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(Self::query_error)?;
                Self::from_json(data)
            })
            .collect()
    }

    fn decode_optional<T: serde::de::DeserializeOwned>(
        row: Option<sqlx::postgres::PgRow>,
    ) -> StorageResult<Option<T>> {
        match row {
            Some(record) => {
                let data: Value = record.try_get("data").map_err(Self::query_error)?;
                Ok(Some(Self::from_json(data)?))
            }
            None => Ok(None),
        }
    }

    /// Distinguish a lost revision race from a missing row after an
    /// update matched nothing
    async fn revision_miss(&self, table: &str, id: &str, expected: u64) -> StorageError {
        let query = format!("SELECT revision FROM {} WHERE id = $1", table);
        match sqlx::query(&query).bind(id).fetch_optional(&self.pool).await {
            Ok(Some(row)) => {
                let current: i64 = row.try_get("revision").unwrap_or(-1);
                StorageError::Conflict(format!(
                    "{} {} is at revision {}, expected {}",
                    table, id, current, expected
                ))
            }
            Ok(None) => StorageError::NotFound(format!("{} {}", table, id)),
            Err(e) => Self::query_error(e),
        }
    }

    // ── Statements ───────────────────────────────────────────────────
    //
    // Each takes any executor so single writes run on the pool and commits
    // run inside one transaction.

    async fn insert_policy_row<'e>(
        executor: impl PgExecutor<'e>,
        policy: &Policy,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_policies
                (id, branch_id, entity_type, document_name, revision, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(policy.id.as_str())
        .bind(&policy.branch_id)
        .bind(policy.entity_type.as_str())
        .bind(&policy.document_name)
        .bind(Self::to_i64(policy.revision)?)
        .bind(Self::to_json(policy)?)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    /// Returns false when no row sits at `expected_revision`
    async fn update_policy_row<'e>(
        executor: impl PgExecutor<'e>,
        policy: &Policy,
        expected_revision: u64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE verification_policies SET
                branch_id = $2,
                entity_type = $3,
                document_name = $4,
                revision = $5,
                data = $6,
                updated_at = $7
            WHERE id = $1 AND revision = $8
            "#,
        )
        .bind(policy.id.as_str())
        .bind(&policy.branch_id)
        .bind(policy.entity_type.as_str())
        .bind(&policy.document_name)
        .bind(Self::to_i64(policy.revision)?)
        .bind(Self::to_json(policy)?)
        .bind(policy.updated_at)
        .bind(Self::to_i64(expected_revision)?)
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_version_row<'e>(
        executor: impl PgExecutor<'e>,
        version: &PolicyVersion,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO policy_versions (policy_id, version_id, data, activated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(version.policy_id().as_str())
        .bind(i64::from(version.version_id()))
        .bind(Self::to_json(version)?)
        .bind(version.activated_at())
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    async fn select_version_row<'e>(
        executor: impl PgExecutor<'e>,
        reference: &VersionRef,
    ) -> StorageResult<Option<PolicyVersion>> {
        let row =
            sqlx::query("SELECT data FROM policy_versions WHERE policy_id = $1 AND version_id = $2")
                .bind(reference.policy_id.as_str())
                .bind(i64::from(reference.version_id))
                .fetch_optional(executor)
                .await
                .map_err(Self::query_error)?;
        Self::decode_optional(row)
    }

    async fn update_version_row<'e>(
        executor: impl PgExecutor<'e>,
        version: &PolicyVersion,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE policy_versions SET data = $3 WHERE policy_id = $1 AND version_id = $2")
            .bind(version.policy_id().as_str())
            .bind(i64::from(version.version_id()))
            .bind(Self::to_json(version)?)
            .execute(executor)
            .await
            .map_err(Self::query_error)?;
        Ok(())
    }

    async fn upsert_active_row<'e>(
        executor: impl PgExecutor<'e>,
        key: &PolicyKey,
        reference: &VersionRef,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO active_policy_versions
                (branch_id, entity_type, document_name, policy_id, version_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (branch_id, entity_type, document_name)
            DO UPDATE SET
                policy_id = EXCLUDED.policy_id,
                version_id = EXCLUDED.version_id
            "#,
        )
        .bind(&key.branch_id)
        .bind(key.entity_type.as_str())
        .bind(&key.document_name)
        .bind(reference.policy_id.as_str())
        .bind(i64::from(reference.version_id))
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    async fn insert_request_row<'e>(
        executor: impl PgExecutor<'e>,
        request: &VerificationRequest,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_requests (id, document_ref, state, revision, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id().as_str())
        .bind(request.document_ref().to_string())
        .bind(request.state().as_str())
        .bind(Self::to_i64(request.revision())?)
        .bind(Self::to_json(request)?)
        .bind(request.created_at())
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    /// Returns false when no row sits at `expected_revision`
    async fn update_request_row<'e>(
        executor: impl PgExecutor<'e>,
        request: &VerificationRequest,
        expected_revision: u64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE verification_requests SET
                state = $2,
                revision = $3,
                data = $4
            WHERE id = $1 AND revision = $5
            "#,
        )
        .bind(request.id().as_str())
        .bind(request.state().as_str())
        .bind(Self::to_i64(request.revision())?)
        .bind(Self::to_json(request)?)
        .bind(Self::to_i64(expected_revision)?)
        .execute(executor)
        .await
        .map_err(Self::query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_audit_row<'e>(
        executor: impl PgExecutor<'e>,
        mut entry: AuditEntry,
    ) -> StorageResult<AuditEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO audit_entries (timestamp, subject_type, subject_id, action, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sequence
            "#,
        )
        .bind(entry.timestamp)
        .bind(entry.subject_type.as_str())
        .bind(&entry.subject_id)
        .bind(entry.action.as_str())
        .bind(Self::to_json(&entry)?)
        .fetch_one(executor)
        .await
        .map_err(Self::query_error)?;

        let sequence: i64 = row.try_get("sequence").map_err(Self::query_error)?;
        entry.sequence = u64::try_from(sequence)
            .map_err(|_| StorageError::InvalidData(format!("sequence {} out of range", sequence)))?;
        Ok(entry)
    }
}

#[async_trait]
impl PolicyRepository for PostgresStorage {
    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>> {
        let row = sqlx::query("SELECT data FROM verification_policies WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::query_error)?;
        Self::decode_optional(row)
    }

    async fn list_policies(
        &self,
        branch_id: Option<&str>,
        entity_type: Option<EntityType>,
    ) -> StorageResult<Vec<Policy>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM verification_policies
            WHERE ($1::TEXT IS NULL OR branch_id = $1)
              AND ($2::TEXT IS NULL OR entity_type = $2)
            ORDER BY document_name, created_at
            "#,
        )
        .bind(branch_id)
        .bind(entity_type.map(|e| e.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;
        Self::decode_rows(rows)
    }

    async fn insert_policy(&self, policy: Policy) -> StorageResult<()> {
        Self::insert_policy_row(&self.pool, &policy).await
    }

    async fn update_policy(&self, policy: Policy, expected_revision: u64) -> StorageResult<()> {
        if !Self::update_policy_row(&self.pool, &policy, expected_revision).await? {
            return Err(self
                .revision_miss("verification_policies", policy.id.as_str(), expected_revision)
                .await);
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyVersionRepository for PostgresStorage {
    async fn insert_version(&self, version: PolicyVersion) -> StorageResult<()> {
        Self::insert_version_row(&self.pool, &version).await
    }

    async fn get_version(&self, reference: &VersionRef) -> StorageResult<Option<PolicyVersion>> {
        Self::select_version_row(&self.pool, reference).await
    }

    async fn list_versions(&self, policy_id: &PolicyId) -> StorageResult<Vec<PolicyVersion>> {
        let rows = sqlx::query(
            "SELECT data FROM policy_versions WHERE policy_id = $1 ORDER BY version_id ASC",
        )
        .bind(policy_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;
        Self::decode_rows(rows)
    }

    async fn update_version_metadata(&self, version: PolicyVersion) -> StorageResult<()> {
        let stored = self
            .get_version(&version.reference())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("version {}", version.reference())))?;
        ensure_frozen_unchanged(&stored, &version)?;
        Self::update_version_row(&self.pool, &version).await
    }

    async fn set_active_version(
        &self,
        key: &PolicyKey,
        reference: VersionRef,
    ) -> StorageResult<()> {
        Self::upsert_active_row(&self.pool, key, &reference).await
    }

    async fn get_active_version(&self, key: &PolicyKey) -> StorageResult<Option<VersionRef>> {
        let row = sqlx::query(
            r#"
            SELECT policy_id, version_id FROM active_policy_versions
            WHERE branch_id = $1 AND entity_type = $2 AND document_name = $3
            "#,
        )
        .bind(&key.branch_id)
        .bind(key.entity_type.as_str())
        .bind(&key.document_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_error)?;

        match row {
            Some(record) => {
                let policy_id: String = record.try_get("policy_id").map_err(Self::query_error)?;
                let version_id: i64 = record.try_get("version_id").map_err(Self::query_error)?;
                let version_id = u32::try_from(version_id).map_err(|_| {
                    StorageError::InvalidData(format!("version id {} out of range", version_id))
                })?;
                Ok(Some(VersionRef::new(PolicyId::new(policy_id), version_id)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RequestRepository for PostgresStorage {
    async fn insert_request(&self, request: VerificationRequest) -> StorageResult<()> {
        Self::insert_request_row(&self.pool, &request).await
    }

    async fn get_request(&self, id: &RequestId) -> StorageResult<Option<VerificationRequest>> {
        let row = sqlx::query("SELECT data FROM verification_requests WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::query_error)?;
        Self::decode_optional(row)
    }

    async fn update_request(
        &self,
        request: VerificationRequest,
        expected_revision: u64,
    ) -> StorageResult<()> {
        if !Self::update_request_row(&self.pool, &request, expected_revision).await? {
            return Err(self
                .revision_miss("verification_requests", request.id().as_str(), expected_revision)
                .await);
        }
        Ok(())
    }

    async fn list_open_requests(&self) -> StorageResult<Vec<VerificationRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM verification_requests
            WHERE state IN ('Pending', 'Escalated')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_requests_for_document(
        &self,
        document_ref: &DocumentRef,
    ) -> StorageResult<Vec<VerificationRequest>> {
        let rows = sqlx::query(
            "SELECT data FROM verification_requests WHERE document_ref = $1 ORDER BY created_at ASC",
        )
        .bind(document_ref.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;
        Self::decode_rows(rows)
    }
}

#[async_trait]
impl AuditRepository for PostgresStorage {
    async fn append_audit(&self, entry: AuditEntry) -> StorageResult<AuditEntry> {
        Self::insert_audit_row(&self.pool, entry).await
    }

    async fn query_audit(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> StorageResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, data FROM audit_entries
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY timestamp ASC, sequence ASC
            "#,
        )
        .bind(subject_type.as_str())
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;

        rows.into_iter()
            .map(|row| {
                let sequence: i64 = row.try_get("sequence").map_err(Self::query_error)?;
                let data: Value = row.try_get("data").map_err(Self::query_error)?;
                let mut entry: AuditEntry = Self::from_json(data)?;
                entry.sequence = u64::try_from(sequence).unwrap_or_default();
                Ok(entry)
            })
            .collect()
    }
}

// A dropped transaction rolls back, so every early return below leaves the
// database as it was.
#[async_trait]
impl CommitRepository for PostgresStorage {
    async fn commit_policy(&self, commit: PolicyCommit) -> StorageResult<AuditEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::query_error)?;

        match commit.expected_revision {
            None => Self::insert_policy_row(&mut *tx, &commit.policy).await?,
            Some(expected) => {
                if !Self::update_policy_row(&mut *tx, &commit.policy, expected).await? {
                    drop(tx);
                    return Err(self
                        .revision_miss("verification_policies", commit.policy.id.as_str(), expected)
                        .await);
                }
            }
        }

        for version in &commit.annotated {
            let stored = Self::select_version_row(&mut *tx, &version.reference())
                .await?
                .ok_or_else(|| {
                    StorageError::NotFound(format!("version {}", version.reference()))
                })?;
            ensure_frozen_unchanged(&stored, version)?;
            Self::update_version_row(&mut *tx, version).await?;
        }

        if let Some(version) = &commit.activated {
            Self::insert_version_row(&mut *tx, version).await?;
            Self::upsert_active_row(&mut *tx, &version.key(), &version.reference()).await?;
        }

        let entry = Self::insert_audit_row(&mut *tx, commit.audit).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(entry)
    }

    async fn commit_request(&self, commit: RequestCommit) -> StorageResult<AuditEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::query_error)?;

        match commit.expected_revision {
            None => Self::insert_request_row(&mut *tx, &commit.request).await?,
            Some(expected) => {
                if !Self::update_request_row(&mut *tx, &commit.request, expected).await? {
                    drop(tx);
                    return Err(self
                        .revision_miss("verification_requests", commit.request.id().as_str(), expected)
                        .await);
                }
            }
        }

        let entry = Self::insert_audit_row(&mut *tx, commit.audit).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(entry)
    }
}

impl Storage for PostgresStorage {}
