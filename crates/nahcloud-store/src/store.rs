use async_trait::async_trait;
use nahcloud_domain::{
    Bucket, BucketFilter, Instance, InstanceFilter, Metadata, MetadataFilter, Object,
    ObjectFilter, Project, ProjectFilter,
};

use crate::error::StoreError;

/// Persistence for every resource the API exposes.
///
/// Implementations must enforce uniqueness atomically with the insert: two
/// concurrent `create_metadata` calls for the same path must never both
/// succeed. The Terraform lock protocol depends on it.
///
/// `get_*` return `Ok(None)` for a missing row; `update_*` and `delete_*`
/// return [`StoreError::NotFound`].
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Projects ──────────────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError>;
    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError>;
    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError>;
    async fn update_project(&self, project: &Project) -> Result<(), StoreError>;
    /// Refuses with `InvalidInput` while the project still owns instances.
    async fn delete_project(&self, id: &str) -> Result<(), StoreError>;

    // ── Instances ─────────────────────────────────────────────────────────────

    /// `ForeignKeyViolation` when the project does not exist.
    async fn create_instance(&self, instance: &Instance) -> Result<(), StoreError>;
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError>;
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, StoreError>;
    async fn update_instance(&self, instance: &Instance) -> Result<(), StoreError>;
    async fn delete_instance(&self, id: &str) -> Result<(), StoreError>;

    // ── Metadata (key-value) ──────────────────────────────────────────────────

    async fn create_metadata(&self, entry: &Metadata) -> Result<(), StoreError>;
    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>, StoreError>;
    async fn get_metadata_by_path(&self, path: &str) -> Result<Option<Metadata>, StoreError>;
    /// Ordered by path.
    async fn list_metadata(&self, filter: &MetadataFilter) -> Result<Vec<Metadata>, StoreError>;
    async fn update_metadata(&self, entry: &Metadata) -> Result<(), StoreError>;
    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError>;

    // ── Buckets ───────────────────────────────────────────────────────────────

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError>;
    async fn get_bucket(&self, id: &str) -> Result<Option<Bucket>, StoreError>;
    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>, StoreError>;
    async fn update_bucket(&self, bucket: &Bucket) -> Result<(), StoreError>;
    /// Removes the bucket's objects too.
    async fn delete_bucket(&self, id: &str) -> Result<(), StoreError>;

    // ── Objects ───────────────────────────────────────────────────────────────

    /// `ForeignKeyViolation` when the bucket does not exist.
    async fn create_object(&self, object: &Object) -> Result<(), StoreError>;
    async fn get_object(&self, id: &str) -> Result<Option<Object>, StoreError>;
    /// Ordered by path.
    async fn list_objects(&self, filter: &ObjectFilter) -> Result<Vec<Object>, StoreError>;
    async fn update_object(&self, object: &Object) -> Result<(), StoreError>;
    async fn delete_object(&self, id: &str) -> Result<(), StoreError>;
}
