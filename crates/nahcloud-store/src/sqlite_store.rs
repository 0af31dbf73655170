use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nahcloud_domain::{
    non_empty, Bucket, BucketFilter, Instance, InstanceFilter, InstanceStatus, Metadata,
    MetadataFilter, Object, ObjectFilter, Project, ProjectFilter,
};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreError;
use crate::store::Store;

// DDL is idempotent and runs on every connect.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id         TEXT PRIMARY KEY,
    name       TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
    id         TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name       TEXT NOT NULL,
    cpu        INTEGER NOT NULL,
    memory_mb  INTEGER NOT NULL,
    image      TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'running',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS metadata (
    id         TEXT PRIMARY KEY,
    path       TEXT UNIQUE NOT NULL,
    value      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS buckets (
    id         TEXT PRIMARY KEY,
    name       TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
    id         TEXT PRIMARY KEY,
    bucket_id  TEXT NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
    path       TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (bucket_id, path)
);
"#;

/// Persistent store backed by a SQLite file.
///
/// Uniqueness and referential rules live in the schema (UNIQUE and FOREIGN
/// KEY constraints); constraint failures are mapped back onto [`StoreError`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Internal(format!("create {parent:?}: {e}")))?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Internal(format!("sqlite url: {e}")))?
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Internal(format!("sqlite connect {path:?}: {e}")))?;

        info!(path = %path.display(), "opened sqlite store");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and apply the schema. The pool must have
    /// foreign keys enabled (sqlx's default for SQLite).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("migration: {e}")))?;
        Ok(())
    }
}

// ── Helper conversions ────────────────────────────────────────────────────────

fn internal(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Internal(format!("{op}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Which column tripped a UNIQUE constraint. SQLite reports it as
/// `UNIQUE constraint failed: table.column[, table.column]`.
fn unique_column(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db
            .message()
            .rsplit('.')
            .next()
            .map(|c| c.trim().to_string()),
        _ => None,
    }
}

fn check_affected(rows: u64, resource: &'static str, id: &str) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::not_found(resource, id))
    } else {
        Ok(())
    }
}

fn to_u32(v: i64, column: &'static str) -> Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::Internal(format!("{column} out of range: {v}")))
}

type ProjectRow = (String, String, DateTime<Utc>, DateTime<Utc>);
type InstanceRow = (
    String,
    String,
    String,
    i64,
    i64,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);
type MetadataRow = (String, String, String, DateTime<Utc>, DateTime<Utc>);
type BucketRow = (String, String, DateTime<Utc>, DateTime<Utc>);
type ObjectRow = (String, String, String, String, DateTime<Utc>, DateTime<Utc>);

fn project_from_row((id, name, created_at, updated_at): ProjectRow) -> Project {
    Project { id, name, created_at, updated_at }
}

fn instance_from_row(row: InstanceRow) -> Result<Instance, StoreError> {
    let (id, project_id, name, cpu, memory_mb, image, status, created_at, updated_at) = row;
    let status = InstanceStatus::from_str(&status)
        .map_err(|_| StoreError::Internal(format!("unknown instance status '{status}'")))?;
    Ok(Instance {
        id,
        project_id,
        name,
        cpu: to_u32(cpu, "cpu")?,
        memory_mb: to_u32(memory_mb, "memory_mb")?,
        image,
        status,
        created_at,
        updated_at,
    })
}

fn metadata_from_row((id, path, value, created_at, updated_at): MetadataRow) -> Metadata {
    Metadata { id, path, value, created_at, updated_at }
}

fn bucket_from_row((id, name, created_at, updated_at): BucketRow) -> Bucket {
    Bucket { id, name, created_at, updated_at }
}

fn object_from_row(
    (id, bucket_id, path, content, created_at, updated_at): ObjectRow,
) -> Object {
    Object { id, bucket_id, path, content, created_at, updated_at }
}

const PROJECT_COLUMNS: &str = "id, name, created_at, updated_at";
const INSTANCE_COLUMNS: &str =
    "id, project_id, name, cpu, memory_mb, image, status, created_at, updated_at";
const METADATA_COLUMNS: &str = "id, path, value, created_at, updated_at";
const BUCKET_COLUMNS: &str = "id, name, created_at, updated_at";
const OBJECT_COLUMNS: &str = "id, bucket_id, path, content, created_at, updated_at";

// ── Store implementation ──────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    // ── Projects ──────────────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                match unique_column(&e).as_deref() {
                    Some("id") => StoreError::already_exists("project", "id", &project.id),
                    _ => StoreError::already_exists("project", "name", &project.name),
                }
            } else {
                internal("create project")(e)
            }
        })?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row: Option<ProjectRow> =
            sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get project"))?;
        Ok(row.map(project_from_row))
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        let row: Option<ProjectRow> =
            sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get project by name"))?;
        Ok(row.map(project_from_row))
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects
             WHERE (?1 IS NULL OR name = ?1)
             ORDER BY name"
        ))
        .bind(non_empty(&filter.name))
        .fetch_all(&self.pool)
        .await
        .map_err(internal("list projects"))?;
        Ok(rows.into_iter().map(project_from_row).collect())
    }

    async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE projects SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&project.name)
            .bind(project.updated_at)
            .bind(&project.id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::already_exists("project", "name", &project.name)
                } else {
                    internal("update project")(e)
                }
            })?;
        check_affected(result.rows_affected(), "project", &project.id)
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(internal("begin"))?;

        let (instance_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM instances WHERE project_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(internal("count instances"))?;
        if instance_count > 0 {
            // Only reached for an existing project: orphan instances cannot exist.
            return Err(StoreError::InvalidInput {
                message: "cannot delete project with existing instances".into(),
                details: Some(json!({ "project_id": id, "instance_count": instance_count })),
            });
        }

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal("delete project"))?;
        check_affected(result.rows_affected(), "project", id)?;

        tx.commit().await.map_err(internal("commit"))?;
        Ok(())
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    async fn create_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO instances
                (id, project_id, name, cpu, memory_mb, image, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id)
        .bind(&instance.project_id)
        .bind(&instance.name)
        .bind(i64::from(instance.cpu))
        .bind(i64::from(instance.memory_mb))
        .bind(&instance.image)
        .bind(instance.status.as_str())
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::foreign_key("project", "id", &instance.project_id)
            } else if is_unique_violation(&e) {
                match unique_column(&e).as_deref() {
                    Some("id") => StoreError::already_exists("instance", "id", &instance.id),
                    _ => StoreError::already_exists("instance", "name", &instance.name),
                }
            } else {
                internal("create instance")(e)
            }
        })?;
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        let row: Option<InstanceRow> =
            sqlx::query_as(&format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get instance"))?;
        row.map(instance_from_row).transpose()
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, StoreError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances
             WHERE (?1 IS NULL OR project_id = ?1)
               AND (?2 IS NULL OR name = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY name"
        ))
        .bind(non_empty(&filter.project_id))
        .bind(non_empty(&filter.name))
        .bind(non_empty(&filter.status))
        .fetch_all(&self.pool)
        .await
        .map_err(internal("list instances"))?;
        rows.into_iter().map(instance_from_row).collect()
    }

    async fn update_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE instances
             SET name = ?, cpu = ?, memory_mb = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&instance.name)
        .bind(i64::from(instance.cpu))
        .bind(i64::from(instance.memory_mb))
        .bind(instance.status.as_str())
        .bind(instance.updated_at)
        .bind(&instance.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists("instance", "name", &instance.name)
            } else {
                internal("update instance")(e)
            }
        })?;
        check_affected(result.rows_affected(), "instance", &instance.id)
    }

    async fn delete_instance(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal("delete instance"))?;
        check_affected(result.rows_affected(), "instance", id)
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    async fn create_metadata(&self, entry: &Metadata) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO metadata (id, path, value, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.path)
        .bind(&entry.value)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                match unique_column(&e).as_deref() {
                    Some("id") => StoreError::already_exists("metadata", "id", &entry.id),
                    _ => StoreError::already_exists("metadata", "path", &entry.path),
                }
            } else {
                internal("create metadata")(e)
            }
        })?;
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>, StoreError> {
        let row: Option<MetadataRow> =
            sqlx::query_as(&format!("SELECT {METADATA_COLUMNS} FROM metadata WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get metadata"))?;
        Ok(row.map(metadata_from_row))
    }

    async fn get_metadata_by_path(&self, path: &str) -> Result<Option<Metadata>, StoreError> {
        let row: Option<MetadataRow> =
            sqlx::query_as(&format!("SELECT {METADATA_COLUMNS} FROM metadata WHERE path = ?"))
                .bind(path)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get metadata by path"))?;
        Ok(row.map(metadata_from_row))
    }

    async fn list_metadata(&self, filter: &MetadataFilter) -> Result<Vec<Metadata>, StoreError> {
        // instr() instead of LIKE so '%' and '_' in prefixes match literally.
        let rows: Vec<MetadataRow> = sqlx::query_as(&format!(
            "SELECT {METADATA_COLUMNS} FROM metadata
             WHERE (?1 IS NULL OR instr(path, ?1) = 1)
             ORDER BY path"
        ))
        .bind(non_empty(&filter.prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(internal("list metadata"))?;
        Ok(rows.into_iter().map(metadata_from_row).collect())
    }

    async fn update_metadata(&self, entry: &Metadata) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE metadata SET path = ?, value = ?, updated_at = ? WHERE id = ?")
                .bind(&entry.path)
                .bind(&entry.value)
                .bind(entry.updated_at)
                .bind(&entry.id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::already_exists("metadata", "path", &entry.path)
                    } else {
                        internal("update metadata")(e)
                    }
                })?;
        check_affected(result.rows_affected(), "metadata", &entry.id)
    }

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM metadata WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal("delete metadata"))?;
        check_affected(result.rows_affected(), "metadata", id)
    }

    // ── Buckets ───────────────────────────────────────────────────────────────

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO buckets (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .bind(bucket.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::already_exists("bucket", "name", &bucket.name)
                } else {
                    internal("create bucket")(e)
                }
            })?;
        Ok(())
    }

    async fn get_bucket(&self, id: &str) -> Result<Option<Bucket>, StoreError> {
        let row: Option<BucketRow> =
            sqlx::query_as(&format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get bucket"))?;
        Ok(row.map(bucket_from_row))
    }

    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>, StoreError> {
        let rows: Vec<BucketRow> = sqlx::query_as(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets
             WHERE (?1 IS NULL OR name = ?1)
             ORDER BY name"
        ))
        .bind(non_empty(&filter.name))
        .fetch_all(&self.pool)
        .await
        .map_err(internal("list buckets"))?;
        Ok(rows.into_iter().map(bucket_from_row).collect())
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE buckets SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&bucket.name)
            .bind(bucket.updated_at)
            .bind(&bucket.id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::already_exists("bucket", "name", &bucket.name)
                } else {
                    internal("update bucket")(e)
                }
            })?;
        check_affected(result.rows_affected(), "bucket", &bucket.id)
    }

    async fn delete_bucket(&self, id: &str) -> Result<(), StoreError> {
        // Objects go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal("delete bucket"))?;
        check_affected(result.rows_affected(), "bucket", id)
    }

    // ── Objects ───────────────────────────────────────────────────────────────

    async fn create_object(&self, object: &Object) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO objects (id, bucket_id, path, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&object.id)
        .bind(&object.bucket_id)
        .bind(&object.path)
        .bind(&object.content)
        .bind(object.created_at)
        .bind(object.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::foreign_key("bucket", "id", &object.bucket_id)
            } else if is_unique_violation(&e) {
                match unique_column(&e).as_deref() {
                    Some("id") => StoreError::already_exists("object", "id", &object.id),
                    _ => StoreError::already_exists("object", "path", &object.path),
                }
            } else {
                internal("create object")(e)
            }
        })?;
        Ok(())
    }

    async fn get_object(&self, id: &str) -> Result<Option<Object>, StoreError> {
        let row: Option<ObjectRow> =
            sqlx::query_as(&format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal("get object"))?;
        Ok(row.map(object_from_row))
    }

    async fn list_objects(&self, filter: &ObjectFilter) -> Result<Vec<Object>, StoreError> {
        let rows: Vec<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE (?1 IS NULL OR bucket_id = ?1)
               AND (?2 IS NULL OR instr(path, ?2) = 1)
             ORDER BY path"
        ))
        .bind(non_empty(&filter.bucket_id))
        .bind(non_empty(&filter.prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(internal("list objects"))?;
        Ok(rows.into_iter().map(object_from_row).collect())
    }

    async fn update_object(&self, object: &Object) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE objects SET path = ?, content = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&object.path)
        .bind(&object.content)
        .bind(object.updated_at)
        .bind(&object.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists("object", "path", &object.path)
            } else {
                internal("update object")(e)
            }
        })?;
        check_affected(result.rows_affected(), "object", &object.id)
    }

    async fn delete_object(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal("delete object"))?;
        check_affected(result.rows_affected(), "object", id)
    }
}
