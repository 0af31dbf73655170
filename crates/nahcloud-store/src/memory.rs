use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nahcloud_domain::{
    non_empty, Bucket, BucketFilter, Instance, InstanceFilter, Metadata, MetadataFilter, Object,
    ObjectFilter, Project, ProjectFilter,
};
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<String, Project>,
    instances: HashMap<String, Instance>,
    metadata: HashMap<String, Metadata>,
    buckets: HashMap<String, Bucket>,
    objects: HashMap<String, Object>,
}

/// In-memory implementation of [`Store`].
///
/// Every uniqueness check runs inside the same write-lock critical section as
/// the insert it guards. All data is lost on process exit; used for
/// `--ephemeral` servers and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl Store for InMemoryStore {
    // ── Projects ──────────────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.projects.contains_key(&project.id) {
            return Err(StoreError::already_exists("project", "id", &project.id));
        }
        if guard.projects.values().any(|p| p.name == project.name) {
            return Err(StoreError::already_exists("project", "name", &project.name));
        }
        guard.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.projects.get(id).cloned())
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.projects.values().find(|p| p.name == name).cloned())
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let guard = self.inner.read().await;
        let name = non_empty(&filter.name);
        let items = guard
            .projects
            .values()
            .filter(|p| name.map_or(true, |n| p.name == n))
            .cloned()
            .collect();
        Ok(sorted_by(items, |p: &Project| p.name.clone()))
    }

    async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.projects.contains_key(&project.id) {
            return Err(StoreError::not_found("project", &project.id));
        }
        if guard
            .projects
            .values()
            .any(|p| p.id != project.id && p.name == project.name)
        {
            return Err(StoreError::already_exists("project", "name", &project.name));
        }
        guard.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.projects.contains_key(id) {
            return Err(StoreError::not_found("project", id));
        }
        let instance_count = guard.instances.values().filter(|i| i.project_id == id).count();
        if instance_count > 0 {
            return Err(StoreError::InvalidInput {
                message: "cannot delete project with existing instances".into(),
                details: Some(json!({ "project_id": id, "instance_count": instance_count })),
            });
        }
        guard.projects.remove(id);
        Ok(())
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    async fn create_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.projects.contains_key(&instance.project_id) {
            return Err(StoreError::foreign_key("project", "id", &instance.project_id));
        }
        if guard.instances.contains_key(&instance.id) {
            return Err(StoreError::already_exists("instance", "id", &instance.id));
        }
        if guard
            .instances
            .values()
            .any(|i| i.project_id == instance.project_id && i.name == instance.name)
        {
            return Err(StoreError::already_exists("instance", "name", &instance.name));
        }
        guard.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.instances.get(id).cloned())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, StoreError> {
        let guard = self.inner.read().await;
        let project_id = non_empty(&filter.project_id);
        let name = non_empty(&filter.name);
        let status = non_empty(&filter.status);
        let items = guard
            .instances
            .values()
            .filter(|i| project_id.map_or(true, |p| i.project_id == p))
            .filter(|i| name.map_or(true, |n| i.name == n))
            .filter(|i| status.map_or(true, |s| i.status.as_str() == s))
            .cloned()
            .collect();
        Ok(sorted_by(items, |i: &Instance| i.name.clone()))
    }

    async fn update_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.instances.contains_key(&instance.id) {
            return Err(StoreError::not_found("instance", &instance.id));
        }
        if guard.instances.values().any(|i| {
            i.id != instance.id && i.project_id == instance.project_id && i.name == instance.name
        }) {
            return Err(StoreError::already_exists("instance", "name", &instance.name));
        }
        guard.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("instance", id))
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    async fn create_metadata(&self, entry: &Metadata) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.metadata.contains_key(&entry.id) {
            return Err(StoreError::already_exists("metadata", "id", &entry.id));
        }
        if guard.metadata.values().any(|m| m.path == entry.path) {
            return Err(StoreError::already_exists("metadata", "path", &entry.path));
        }
        guard.metadata.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<Metadata>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.metadata.get(id).cloned())
    }

    async fn get_metadata_by_path(&self, path: &str) -> Result<Option<Metadata>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.metadata.values().find(|m| m.path == path).cloned())
    }

    async fn list_metadata(&self, filter: &MetadataFilter) -> Result<Vec<Metadata>, StoreError> {
        let guard = self.inner.read().await;
        let prefix = non_empty(&filter.prefix);
        let items = guard
            .metadata
            .values()
            .filter(|m| prefix.map_or(true, |p| m.path.starts_with(p)))
            .cloned()
            .collect();
        Ok(sorted_by(items, |m: &Metadata| m.path.clone()))
    }

    async fn update_metadata(&self, entry: &Metadata) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.metadata.contains_key(&entry.id) {
            return Err(StoreError::not_found("metadata", &entry.id));
        }
        if guard
            .metadata
            .values()
            .any(|m| m.id != entry.id && m.path == entry.path)
        {
            return Err(StoreError::already_exists("metadata", "path", &entry.path));
        }
        guard.metadata.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .metadata
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("metadata", id))
    }

    // ── Buckets ───────────────────────────────────────────────────────────────

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.buckets.values().any(|b| b.name == bucket.name) {
            return Err(StoreError::already_exists("bucket", "name", &bucket.name));
        }
        if guard.buckets.contains_key(&bucket.id) {
            return Err(StoreError::already_exists("bucket", "id", &bucket.id));
        }
        guard.buckets.insert(bucket.id.clone(), bucket.clone());
        Ok(())
    }

    async fn get_bucket(&self, id: &str) -> Result<Option<Bucket>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.buckets.get(id).cloned())
    }

    async fn list_buckets(&self, filter: &BucketFilter) -> Result<Vec<Bucket>, StoreError> {
        let guard = self.inner.read().await;
        let name = non_empty(&filter.name);
        let items = guard
            .buckets
            .values()
            .filter(|b| name.map_or(true, |n| b.name == n))
            .cloned()
            .collect();
        Ok(sorted_by(items, |b: &Bucket| b.name.clone()))
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.buckets.contains_key(&bucket.id) {
            return Err(StoreError::not_found("bucket", &bucket.id));
        }
        if guard
            .buckets
            .values()
            .any(|b| b.id != bucket.id && b.name == bucket.name)
        {
            return Err(StoreError::already_exists("bucket", "name", &bucket.name));
        }
        guard.buckets.insert(bucket.id.clone(), bucket.clone());
        Ok(())
    }

    async fn delete_bucket(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.buckets.remove(id).is_none() {
            return Err(StoreError::not_found("bucket", id));
        }
        guard.objects.retain(|_, o| o.bucket_id != id);
        Ok(())
    }

    // ── Objects ───────────────────────────────────────────────────────────────

    async fn create_object(&self, object: &Object) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.buckets.contains_key(&object.bucket_id) {
            return Err(StoreError::foreign_key("bucket", "id", &object.bucket_id));
        }
        if guard.objects.contains_key(&object.id) {
            return Err(StoreError::already_exists("object", "id", &object.id));
        }
        if guard
            .objects
            .values()
            .any(|o| o.bucket_id == object.bucket_id && o.path == object.path)
        {
            return Err(StoreError::already_exists("object", "path", &object.path));
        }
        guard.objects.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn get_object(&self, id: &str) -> Result<Option<Object>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.objects.get(id).cloned())
    }

    async fn list_objects(&self, filter: &ObjectFilter) -> Result<Vec<Object>, StoreError> {
        let guard = self.inner.read().await;
        let bucket_id = non_empty(&filter.bucket_id);
        let prefix = non_empty(&filter.prefix);
        let items = guard
            .objects
            .values()
            .filter(|o| bucket_id.map_or(true, |b| o.bucket_id == b))
            .filter(|o| prefix.map_or(true, |p| o.path.starts_with(p)))
            .cloned()
            .collect();
        Ok(sorted_by(items, |o: &Object| o.path.clone()))
    }

    async fn update_object(&self, object: &Object) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.objects.contains_key(&object.id) {
            return Err(StoreError::not_found("object", &object.id));
        }
        if guard.objects.values().any(|o| {
            o.id != object.id && o.bucket_id == object.bucket_id && o.path == object.path
        }) {
            return Err(StoreError::already_exists("object", "path", &object.path));
        }
        guard.objects.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn delete_object(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .objects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("object", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nahcloud_domain::InstanceStatus;

    fn project(id: &str, name: &str) -> Project {
        let now = Utc::now();
        Project { id: id.into(), name: name.into(), created_at: now, updated_at: now }
    }

    fn instance(id: &str, project_id: &str, name: &str) -> Instance {
        let now = Utc::now();
        Instance {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            cpu: 2,
            memory_mb: 2048,
            image: "ubuntu-22.04".into(),
            status: InstanceStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(id: &str, path: &str, value: &str) -> Metadata {
        let now = Utc::now();
        Metadata {
            id: id.into(),
            path: path.into(),
            value: value.into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn bucket(name: &str) -> Bucket {
        let now = Utc::now();
        Bucket { id: name.into(), name: name.into(), created_at: now, updated_at: now }
    }

    fn object(id: &str, bucket_id: &str, path: &str) -> Object {
        let now = Utc::now();
        Object {
            id: id.into(),
            bucket_id: bucket_id.into(),
            path: path.into(),
            content: "aGVsbG8=".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn project_names_are_unique() {
        let store = InMemoryStore::new();
        store.create_project(&project("p1", "web")).await.unwrap();
        let err = store.create_project(&project("p2", "web")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { field: "name", .. }));

        let found = store.get_project_by_name("web").await.unwrap().unwrap();
        assert_eq!(found.id, "p1");
    }

    #[tokio::test]
    async fn projects_list_sorted_and_filtered() {
        let store = InMemoryStore::new();
        store.create_project(&project("p1", "zeta")).await.unwrap();
        store.create_project(&project("p2", "alpha")).await.unwrap();

        let all = store.list_projects(&ProjectFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);

        let filtered = store
            .list_projects(&ProjectFilter { name: Some("zeta".into()) })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn instance_requires_project() {
        let store = InMemoryStore::new();
        let err = store.create_instance(&instance("i1", "missing", "vm")).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { resource: "project", .. }));
    }

    #[tokio::test]
    async fn project_with_instances_cannot_be_deleted() {
        let store = InMemoryStore::new();
        store.create_project(&project("p1", "web")).await.unwrap();
        store.create_instance(&instance("i1", "p1", "vm")).await.unwrap();

        match store.delete_project("p1").await.unwrap_err() {
            StoreError::InvalidInput { details, .. } => {
                assert_eq!(details.unwrap()["instance_count"], 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        store.delete_instance("i1").await.unwrap();
        store.delete_project("p1").await.unwrap();
        assert!(store.get_project("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn instance_names_unique_per_project() {
        let store = InMemoryStore::new();
        store.create_project(&project("p1", "a")).await.unwrap();
        store.create_project(&project("p2", "b")).await.unwrap();
        store.create_instance(&instance("i1", "p1", "vm")).await.unwrap();
        store.create_instance(&instance("i2", "p2", "vm")).await.unwrap();
        assert!(store.create_instance(&instance("i3", "p1", "vm")).await.is_err());

        let in_p1 = store
            .list_instances(&InstanceFilter { project_id: Some("p1".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(in_p1.len(), 1);
    }

    #[tokio::test]
    async fn metadata_path_is_unique() {
        let store = InMemoryStore::new();
        store.create_metadata(&entry("m1", "tfstate/a.lock", "{}")).await.unwrap();
        let err = store
            .create_metadata(&entry("m2", "tfstate/a.lock", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { field: "path", .. }));
    }

    #[tokio::test]
    async fn concurrent_metadata_creates_have_one_winner() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_metadata(&entry(&format!("m{n}"), "race", &n.to_string()))
                    .await
                    .is_ok()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn metadata_prefix_listing() {
        let store = InMemoryStore::new();
        store.create_metadata(&entry("m1", "tfstate/b", "")).await.unwrap();
        store.create_metadata(&entry("m2", "tfstate/a", "")).await.unwrap();
        store.create_metadata(&entry("m3", "other/x", "")).await.unwrap();

        let listed = store
            .list_metadata(&MetadataFilter { prefix: Some("tfstate/".into()) })
            .await
            .unwrap();
        let paths: Vec<_> = listed.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, ["tfstate/a", "tfstate/b"]);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.delete_metadata("nope").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn bucket_delete_cascades_objects() {
        let store = InMemoryStore::new();
        store.create_bucket(&bucket("assets")).await.unwrap();
        store.create_object(&object("o1", "assets", "a.txt")).await.unwrap();
        store.create_object(&object("o2", "assets", "b.txt")).await.unwrap();

        store.delete_bucket("assets").await.unwrap();
        assert!(store.get_object("o1").await.unwrap().is_none());
        assert!(store.list_objects(&ObjectFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn object_requires_bucket() {
        let store = InMemoryStore::new();
        let err = store.create_object(&object("o1", "missing", "a")).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { resource: "bucket", .. }));
    }
}
