use std::sync::Arc;

use chrono::Utc;
use nahcloud_domain::validate;
use nahcloud_domain::{
    Bucket, BucketFilter, CreateBucketRequest, CreateInstanceRequest, CreateMetadataRequest,
    CreateObjectRequest, CreateProjectRequest, DomainError, Instance, InstanceFilter,
    InstanceStatus, Metadata, MetadataFilter, Object, ObjectFilter, Project, ProjectFilter,
    UpdateBucketRequest, UpdateInstanceRequest, UpdateMetadataRequest, UpdateObjectRequest,
    UpdateProjectRequest,
};
use nahcloud_store::Store;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

/// Business rules for every resource, on top of a [`Store`].
///
/// Cheap to clone; all clones share the same store.
#[derive(Clone)]
pub struct Service {
    pub(crate) store: Arc<dyn Store>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn immutable_field(field: &str, current: &str, requested: &str, hint: &str) -> DomainError {
    DomainError::invalid_input_with(
        format!("cannot change {field} from '{current}' to '{requested}': {field} is immutable"),
        json!({
            "field": field,
            "current_value": current,
            "requested_value": requested,
            "solution": hint,
        }),
    )
}

impl Service {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Cheapest round trip that proves the store is reachable.
    pub async fn ping(&self) -> Result<(), DomainError> {
        self.store.get_project("").await?;
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────────────

    pub async fn create_project(&self, req: CreateProjectRequest) -> Result<Project, DomainError> {
        validate::resource_name("project", &req.name)?;
        let now = Utc::now();
        let project = Project { id: new_id(), name: req.name, created_at: now, updated_at: now };
        self.store.create_project(&project).await?;
        info!(id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, DomainError> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| DomainError::not_found("project", id))
    }

    pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, DomainError> {
        Ok(self.store.list_projects(filter).await?)
    }

    pub async fn update_project(
        &self,
        id: &str,
        req: UpdateProjectRequest,
    ) -> Result<Project, DomainError> {
        validate::resource_name("project", &req.name)?;
        let mut project = self.get_project(id).await?;
        project.name = req.name;
        project.updated_at = Utc::now();
        self.store.update_project(&project).await?;
        Ok(project)
    }

    pub async fn delete_project(&self, id: &str) -> Result<(), DomainError> {
        self.store.delete_project(id).await?;
        info!(%id, "project deleted");
        Ok(())
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    pub async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, DomainError> {
        validate::resource_name("instance", &req.name)?;
        let (cpu, memory_mb) = validate::instance_specs(req.cpu, req.memory_mb, &req.image)?;
        let status = match nahcloud_domain::non_empty(&req.status) {
            Some(s) => validate::instance_status(s)?,
            None => InstanceStatus::Running,
        };

        if self.store.get_project(&req.project_id).await?.is_none() {
            return Err(DomainError::foreign_key("project", "id", req.project_id));
        }

        let now = Utc::now();
        let instance = Instance {
            id: new_id(),
            project_id: req.project_id,
            name: req.name,
            cpu,
            memory_mb,
            image: req.image,
            status,
            created_at: now,
            updated_at: now,
        };
        self.store.create_instance(&instance).await?;
        info!(id = %instance.id, project_id = %instance.project_id, "instance created");
        Ok(instance)
    }

    pub async fn get_instance(&self, id: &str) -> Result<Instance, DomainError> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| DomainError::not_found("instance", id))
    }

    pub async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<Instance>, DomainError> {
        Ok(self.store.list_instances(filter).await?)
    }

    /// Partial update. The image cannot change; resending the current image is fine.
    pub async fn update_instance(
        &self,
        id: &str,
        req: UpdateInstanceRequest,
    ) -> Result<Instance, DomainError> {
        let mut instance = self.get_instance(id).await?;

        if let Some(image) = req.image.as_deref() {
            if image != instance.image {
                return Err(immutable_field(
                    "image",
                    &instance.image,
                    image,
                    "destroy and recreate the instance to change its image",
                ));
            }
        }

        if let Some(name) = req.name {
            validate::resource_name("instance", &name)?;
            instance.name = name;
        }
        if req.cpu.is_some() || req.memory_mb.is_some() {
            let (cpu, memory_mb) = validate::instance_specs(
                req.cpu.unwrap_or_else(|| i64::from(instance.cpu)),
                req.memory_mb.unwrap_or_else(|| i64::from(instance.memory_mb)),
                &instance.image,
            )?;
            instance.cpu = cpu;
            instance.memory_mb = memory_mb;
        }
        if let Some(status) = req.status.as_deref() {
            instance.status = validate::instance_status(status)?;
        }

        instance.updated_at = Utc::now();
        self.store.update_instance(&instance).await?;
        debug!(%id, status = %instance.status, "instance updated");
        Ok(instance)
    }

    pub async fn delete_instance(&self, id: &str) -> Result<(), DomainError> {
        self.store.delete_instance(id).await?;
        info!(%id, "instance deleted");
        Ok(())
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    pub async fn create_metadata(
        &self,
        req: CreateMetadataRequest,
    ) -> Result<Metadata, DomainError> {
        if req.path.is_empty() {
            return Err(DomainError::invalid_input("metadata path cannot be empty"));
        }
        let now = Utc::now();
        let entry = Metadata {
            id: new_id(),
            path: req.path,
            value: req.value,
            created_at: now,
            updated_at: now,
        };
        self.store.create_metadata(&entry).await?;
        Ok(entry)
    }

    pub async fn get_metadata(&self, id: &str) -> Result<Metadata, DomainError> {
        self.store
            .get_metadata(id)
            .await?
            .ok_or_else(|| DomainError::not_found("metadata", id))
    }

    pub async fn list_metadata(
        &self,
        filter: &MetadataFilter,
    ) -> Result<Vec<Metadata>, DomainError> {
        Ok(self.store.list_metadata(filter).await?)
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        req: UpdateMetadataRequest,
    ) -> Result<Metadata, DomainError> {
        let mut entry = self.get_metadata(id).await?;
        if let Some(path) = req.path {
            if path.is_empty() {
                return Err(DomainError::invalid_input("metadata path cannot be empty"));
            }
            entry.path = path;
        }
        if let Some(value) = req.value {
            entry.value = value;
        }
        entry.updated_at = Utc::now();
        self.store.update_metadata(&entry).await?;
        Ok(entry)
    }

    pub async fn delete_metadata(&self, id: &str) -> Result<(), DomainError> {
        Ok(self.store.delete_metadata(id).await?)
    }

    // ── Buckets ───────────────────────────────────────────────────────────────

    /// The bucket's id is its name.
    pub async fn create_bucket(&self, req: CreateBucketRequest) -> Result<Bucket, DomainError> {
        validate::resource_name("bucket", &req.name)?;
        let now = Utc::now();
        let bucket = Bucket { id: req.name.clone(), name: req.name, created_at: now, updated_at: now };
        self.store.create_bucket(&bucket).await?;
        info!(name = %bucket.name, "bucket created");
        Ok(bucket)
    }

    pub async fn get_bucket(&self, id: &str) -> Result<Bucket, DomainError> {
        self.store
            .get_bucket(id)
            .await?
            .ok_or_else(|| DomainError::not_found("bucket", id))
    }

    pub async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>, DomainError> {
        Ok(self.store.list_buckets(filter).await?)
    }

    /// Only a no-op rename is accepted.
    pub async fn update_bucket(
        &self,
        id: &str,
        req: UpdateBucketRequest,
    ) -> Result<Bucket, DomainError> {
        validate::resource_name("bucket", &req.name)?;
        let bucket = self.get_bucket(id).await?;
        if req.name != bucket.name {
            return Err(immutable_field(
                "name",
                &bucket.name,
                &req.name,
                "the name is the bucket id; destroy and recreate the bucket to rename it",
            ));
        }
        Ok(bucket)
    }

    pub async fn delete_bucket(&self, id: &str) -> Result<(), DomainError> {
        self.store.delete_bucket(id).await?;
        info!(%id, "bucket deleted");
        Ok(())
    }

    // ── Objects ───────────────────────────────────────────────────────────────
    //
    // Objects are always addressed through their bucket. One that exists but
    // lives in another bucket is reported as not found.

    /// `bucket_id` comes from the URL and overrides any value in the body.
    pub async fn create_object(
        &self,
        bucket_id: &str,
        req: CreateObjectRequest,
    ) -> Result<Object, DomainError> {
        validate::object_path(&req.path)?;
        if bucket_id.is_empty() {
            return Err(DomainError::invalid_input("bucket_id cannot be empty"));
        }
        if req.content.is_empty() {
            return Err(DomainError::invalid_input("content cannot be empty"));
        }
        if self.store.get_bucket(bucket_id).await?.is_none() {
            return Err(DomainError::foreign_key("bucket", "id", bucket_id));
        }

        let now = Utc::now();
        let object = Object {
            id: new_id(),
            bucket_id: bucket_id.to_string(),
            path: req.path,
            content: req.content,
            created_at: now,
            updated_at: now,
        };
        self.store.create_object(&object).await?;
        Ok(object)
    }

    pub async fn get_object(&self, bucket_id: &str, id: &str) -> Result<Object, DomainError> {
        self.store
            .get_object(id)
            .await?
            .filter(|o| o.bucket_id == bucket_id)
            .ok_or_else(|| DomainError::not_found("object", id))
    }

    pub async fn list_objects(
        &self,
        bucket_id: &str,
        filter: ObjectFilter,
    ) -> Result<Vec<Object>, DomainError> {
        let filter = ObjectFilter { bucket_id: Some(bucket_id.to_string()), ..filter };
        Ok(self.store.list_objects(&filter).await?)
    }

    pub async fn update_object(
        &self,
        bucket_id: &str,
        id: &str,
        req: UpdateObjectRequest,
    ) -> Result<Object, DomainError> {
        let mut object = self.get_object(bucket_id, id).await?;
        if let Some(path) = req.path {
            validate::object_path(&path)?;
            object.path = path;
        }
        if let Some(content) = req.content {
            if content.is_empty() {
                return Err(DomainError::invalid_input("content cannot be empty"));
            }
            object.content = content;
        }
        object.updated_at = Utc::now();
        self.store.update_object(&object).await?;
        Ok(object)
    }

    pub async fn delete_object(&self, bucket_id: &str, id: &str) -> Result<(), DomainError> {
        self.get_object(bucket_id, id).await?;
        Ok(self.store.delete_object(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nahcloud_store::InMemoryStore;

    fn service() -> Service {
        Service::new(Arc::new(InMemoryStore::new()))
    }

    fn instance_req(project_id: &str, name: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            project_id: project_id.into(),
            name: name.into(),
            cpu: 2,
            memory_mb: 4096,
            image: "ubuntu-22.04".into(),
            status: None,
        }
    }

    #[tokio::test]
    async fn project_lifecycle() {
        let svc = service();
        let p = svc.create_project(CreateProjectRequest { name: "web".into() }).await.unwrap();
        assert_eq!(svc.get_project(&p.id).await.unwrap().name, "web");

        let renamed = svc
            .update_project(&p.id, UpdateProjectRequest { name: "web-2".into() })
            .await
            .unwrap();
        assert_eq!(renamed.name, "web-2");

        svc.delete_project(&p.id).await.unwrap();
        assert!(svc.get_project(&p.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn invalid_project_name_rejected() {
        let svc = service();
        let err = svc
            .create_project(CreateProjectRequest { name: "no spaces".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn instance_defaults_to_running() {
        let svc = service();
        let p = svc.create_project(CreateProjectRequest { name: "web".into() }).await.unwrap();
        let i = svc.create_instance(instance_req(&p.id, "vm-1")).await.unwrap();
        assert_eq!(i.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn instance_for_missing_project_is_fk_violation() {
        let svc = service();
        let err = svc.create_instance(instance_req("ghost", "vm")).await.unwrap_err();
        assert_eq!(err.code(), "FOREIGN_KEY_VIOLATION");
    }

    #[tokio::test]
    async fn instance_image_is_immutable() {
        let svc = service();
        let p = svc.create_project(CreateProjectRequest { name: "web".into() }).await.unwrap();
        let i = svc.create_instance(instance_req(&p.id, "vm")).await.unwrap();

        let same = UpdateInstanceRequest {
            image: Some("ubuntu-22.04".into()),
            cpu: Some(8),
            ..Default::default()
        };
        assert_eq!(svc.update_instance(&i.id, same).await.unwrap().cpu, 8);

        let changed = UpdateInstanceRequest { image: Some("debian".into()), ..Default::default() };
        let err = svc.update_instance(&i.id, changed).await.unwrap_err();
        assert_eq!(err.details().unwrap()["field"], "image");
    }

    #[tokio::test]
    async fn instance_update_validates_combined_specs() {
        let svc = service();
        let p = svc.create_project(CreateProjectRequest { name: "web".into() }).await.unwrap();
        let i = svc.create_instance(instance_req(&p.id, "vm")).await.unwrap();

        let too_big = UpdateInstanceRequest { memory_mb: Some(1 << 30), ..Default::default() };
        assert!(svc.update_instance(&i.id, too_big).await.is_err());

        let stop = UpdateInstanceRequest { status: Some("stopped".into()), ..Default::default() };
        let updated = svc.update_instance(&i.id, stop).await.unwrap();
        assert_eq!(updated.status, InstanceStatus::Stopped);
        assert_eq!(updated.memory_mb, 4096);
    }

    #[tokio::test]
    async fn project_with_instances_is_protected() {
        let svc = service();
        let p = svc.create_project(CreateProjectRequest { name: "web".into() }).await.unwrap();
        svc.create_instance(instance_req(&p.id, "vm")).await.unwrap();

        let err = svc.delete_project(&p.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(err.details().unwrap()["project_id"], p.id.as_str());
    }

    #[tokio::test]
    async fn bucket_rename_is_rejected() {
        let svc = service();
        let b = svc.create_bucket(CreateBucketRequest { name: "assets".into() }).await.unwrap();
        assert_eq!(b.id, "assets");

        let same = svc
            .update_bucket("assets", UpdateBucketRequest { name: "assets".into() })
            .await
            .unwrap();
        assert_eq!(same, b);

        let err = svc
            .update_bucket("assets", UpdateBucketRequest { name: "media".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn objects_are_scoped_to_their_bucket() {
        let svc = service();
        svc.create_bucket(CreateBucketRequest { name: "a".into() }).await.unwrap();
        svc.create_bucket(CreateBucketRequest { name: "b".into() }).await.unwrap();
        let obj = svc
            .create_object(
                "a",
                CreateObjectRequest {
                    bucket_id: "ignored".into(),
                    path: "x/y.txt".into(),
                    content: "eHl6".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(obj.bucket_id, "a");

        assert!(svc.get_object("b", &obj.id).await.unwrap_err().is_not_found());
        assert!(svc.delete_object("b", &obj.id).await.unwrap_err().is_not_found());
        assert_eq!(svc.list_objects("b", ObjectFilter::default()).await.unwrap().len(), 0);
        assert_eq!(svc.list_objects("a", ObjectFilter::default()).await.unwrap().len(), 1);

        svc.delete_object("a", &obj.id).await.unwrap();
    }

    #[tokio::test]
    async fn object_requires_content_and_bucket() {
        let svc = service();
        let req = CreateObjectRequest { path: "p".into(), content: String::new(), ..Default::default() };
        assert_eq!(svc.create_object("a", req).await.unwrap_err().code(), "INVALID_INPUT");

        let req = CreateObjectRequest { path: "p".into(), content: "Yg==".into(), ..Default::default() };
        assert_eq!(
            svc.create_object("missing", req).await.unwrap_err().code(),
            "FOREIGN_KEY_VIOLATION"
        );
    }

    #[tokio::test]
    async fn metadata_path_must_be_unique() {
        let svc = service();
        let req = CreateMetadataRequest { path: "app/config".into(), value: "1".into() };
        svc.create_metadata(req.clone()).await.unwrap();
        assert_eq!(svc.create_metadata(req).await.unwrap_err().code(), "ALREADY_EXISTS");
    }
}
