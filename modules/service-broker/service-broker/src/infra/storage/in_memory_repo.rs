//! In-memory repository implementation.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use service_broker_sdk::{ServiceBinding, ServiceInstance};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::repo::{InstanceTransaction, ServiceInstanceRepository};

#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<Uuid, ServiceInstance>,
    bindings: HashMap<Uuid, ServiceBinding>,
}

impl Tables {
    fn bindings_of(&self, instance_guid: Uuid, route: bool) -> Vec<ServiceBinding> {
        let mut found: Vec<ServiceBinding> = self
            .bindings
            .values()
            .filter(|b| b.service_instance_guid == instance_guid && b.is_route_binding() == route)
            .cloned()
            .collect();
        found.sort_by_key(|b| (b.created_at, b.guid));
        found
    }
}

/// In-memory store for service instances and bindings.
///
/// A transaction holds the store lock from [`ServiceInstanceRepository::begin`]
/// until it is committed or dropped, which serializes writers the way a row
/// lock would. Writes are staged and applied on commit only.
///
/// Calling repository methods while holding a transaction in the same task
/// deadlocks.
#[derive(Clone, Default)]
pub struct InMemoryServiceInstanceRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryServiceInstanceRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an instance.
    pub async fn insert_instance(&self, instance: ServiceInstance) {
        self.tables
            .lock()
            .await
            .instances
            .insert(instance.guid, instance);
    }

    /// Insert or replace a binding.
    ///
    /// # Errors
    ///
    /// Fails when the bound instance does not exist.
    pub async fn insert_binding(&self, binding: ServiceBinding) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables
            .instances
            .contains_key(&binding.service_instance_guid)
        {
            bail!(
                "service instance {} not found for binding {}",
                binding.service_instance_guid,
                binding.guid
            );
        }
        tables.bindings.insert(binding.guid, binding);
        Ok(())
    }

    pub async fn instance_count(&self) -> usize {
        self.tables.lock().await.instances.len()
    }

    /// Number of `(app, route)` bindings stored.
    pub async fn binding_counts(&self) -> (usize, usize) {
        let tables = self.tables.lock().await;
        let routes = tables
            .bindings
            .values()
            .filter(|b| b.is_route_binding())
            .count();
        (tables.bindings.len() - routes, routes)
    }
}

#[async_trait]
impl ServiceInstanceRepository for InMemoryServiceInstanceRepository {
    async fn find(&self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>> {
        Ok(self.tables.lock().await.instances.get(&guid).cloned())
    }

    async fn app_bindings(&self, instance_guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        Ok(self.tables.lock().await.bindings_of(instance_guid, false))
    }

    async fn route_bindings(&self, instance_guid: Uuid) -> anyhow::Result<Vec<ServiceBinding>> {
        Ok(self.tables.lock().await.bindings_of(instance_guid, true))
    }

    async fn delete_binding(&self, binding: &ServiceBinding) -> anyhow::Result<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .bindings
            .remove(&binding.guid)
            .is_some())
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn InstanceTransaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged: HashMap::new(),
        }))
    }
}

/// Staged instance write; `None` destroys the row.
type StagedRow = Option<ServiceInstance>;

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: HashMap<Uuid, StagedRow>,
}

impl InMemoryTransaction {
    fn current(&self, guid: Uuid) -> Option<ServiceInstance> {
        match self.staged.get(&guid) {
            Some(staged) => staged.clone(),
            None => self.guard.instances.get(&guid).cloned(),
        }
    }
}

#[async_trait]
impl InstanceTransaction for InMemoryTransaction {
    async fn lock_and_reload(&mut self, guid: Uuid) -> anyhow::Result<Option<ServiceInstance>> {
        Ok(self.current(guid))
    }

    async fn save(&mut self, instance: &ServiceInstance) -> anyhow::Result<()> {
        if self.current(instance.guid).is_none() {
            bail!("service instance {} not found", instance.guid);
        }
        self.staged.insert(instance.guid, Some(instance.clone()));
        Ok(())
    }

    async fn destroy(&mut self, guid: Uuid) -> anyhow::Result<()> {
        if self.current(guid).is_none() {
            bail!("service instance {guid} not found");
        }
        let remaining = self
            .guard
            .bindings
            .values()
            .filter(|b| b.service_instance_guid == guid)
            .count();
        if remaining > 0 {
            return Err(anyhow!(
                "service instance {guid} still has {remaining} binding(s)"
            ));
        }
        self.staged.insert(guid, None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let Self { mut guard, staged } = *self;
        for (guid, row) in staged {
            match row {
                Some(instance) => guard.instances.insert(guid, instance),
                None => guard.instances.remove(&guid),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use service_broker_sdk::{BindingKind, InstanceKind};

    fn instance(guid: Uuid) -> ServiceInstance {
        ServiceInstance {
            guid,
            name: format!("si-{guid}"),
            space_guid: Uuid::new_v4(),
            kind: InstanceKind::UserProvided {
                credentials: serde_json::json!({}),
                syslog_drain_url: None,
                route_service_url: None,
            },
            last_operation: None,
        }
    }

    fn binding(instance_guid: Uuid, kind: BindingKind) -> ServiceBinding {
        ServiceBinding {
            guid: Uuid::new_v4(),
            service_instance_guid: instance_guid,
            kind,
            credentials: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_rolled_back() {
        let repo = InMemoryServiceInstanceRepository::new();
        let guid = Uuid::new_v4();
        repo.insert_instance(instance(guid)).await;

        {
            let mut tx = repo.begin().await.unwrap();
            let mut si = tx.lock_and_reload(guid).await.unwrap().unwrap();
            si.name = "renamed".to_owned();
            tx.save(&si).await.unwrap();
            assert_eq!(
                tx.lock_and_reload(guid).await.unwrap().unwrap().name,
                "renamed"
            );
        }

        assert_eq!(repo.find(guid).await.unwrap().unwrap().name, format!("si-{guid}"));
    }

    #[tokio::test]
    async fn committed_destroy_removes_the_row() {
        let repo = InMemoryServiceInstanceRepository::new();
        let guid = Uuid::new_v4();
        repo.insert_instance(instance(guid)).await;

        let mut tx = repo.begin().await.unwrap();
        tx.destroy(guid).await.unwrap();
        assert!(tx.lock_and_reload(guid).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert!(repo.find(guid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroy_is_rejected_while_bindings_remain() {
        let repo = InMemoryServiceInstanceRepository::new();
        let guid = Uuid::new_v4();
        repo.insert_instance(instance(guid)).await;
        repo.insert_binding(binding(guid, BindingKind::App { app_guid: Uuid::new_v4() }))
            .await
            .unwrap();

        let mut tx = repo.begin().await.unwrap();
        let err = tx.destroy(guid).await.unwrap_err();
        assert!(err.to_string().contains("still has 1 binding"));
    }

    #[tokio::test]
    async fn bindings_are_split_by_kind() {
        let repo = InMemoryServiceInstanceRepository::new();
        let guid = Uuid::new_v4();
        repo.insert_instance(instance(guid)).await;
        let app = binding(guid, BindingKind::App { app_guid: Uuid::new_v4() });
        let route = binding(guid, BindingKind::Route { route_guid: Uuid::new_v4() });
        repo.insert_binding(app.clone()).await.unwrap();
        repo.insert_binding(route.clone()).await.unwrap();

        assert_eq!(repo.app_bindings(guid).await.unwrap(), vec![app.clone()]);
        assert_eq!(repo.route_bindings(guid).await.unwrap(), vec![route]);

        assert!(repo.delete_binding(&app).await.unwrap());
        assert!(!repo.delete_binding(&app).await.unwrap());
    }

    #[tokio::test]
    async fn binding_requires_existing_instance() {
        let repo = InMemoryServiceInstanceRepository::new();
        let orphan = binding(Uuid::new_v4(), BindingKind::App { app_guid: Uuid::new_v4() });
        assert!(repo.insert_binding(orphan).await.is_err());
    }
}
