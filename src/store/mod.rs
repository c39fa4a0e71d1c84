//! Durable instance and service records.
//!
//! [`Store`] is the only persistence surface the rest of the crate sees. Both
//! backends keep a [`StoreData`] snapshot and implement [`StoreBackend`]; every
//! `Store` operation is written once against that snapshot.

mod file;
mod memory;
mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use types::{InstanceRecord, ServiceRecord, Status};

pub trait Store: Send + Sync {
    fn create_instance(&self, record: InstanceRecord) -> Result<()>;
    fn update_instance_status(&self, id: &str, status: Status) -> Result<()>;
    /// Removes the instance and every service it owns.
    fn delete_instance(&self, id: &str) -> Result<()>;
    fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>>;
    fn list_instances(&self) -> Result<Vec<InstanceRecord>>;
    fn find_instance_by_name(&self, name: &str) -> Result<Option<InstanceRecord>>;

    fn create_service(&self, record: ServiceRecord) -> Result<()>;
    fn update_service_status(&self, instance_id: &str, name: &str, status: Status) -> Result<()>;
    fn list_services(&self, instance_id: &str) -> Result<Vec<ServiceRecord>>;

    /// Insert an instance and its services as one write; nothing is kept on failure.
    fn create_instance_with_services(
        &self,
        instance: InstanceRecord,
        services: Vec<ServiceRecord>,
    ) -> Result<()>;
}

/// Snapshot access a backend provides. `write` must leave the stored state
/// untouched when the closure fails.
pub trait StoreBackend: Send + Sync {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T>;
    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T>;
}

/// Everything the store persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    instances: BTreeMap<String, InstanceRecord>,
    #[serde(default)]
    services: Vec<ServiceRecord>,
}

impl StoreData {
    fn insert_instance(&mut self, record: InstanceRecord) -> Result<()> {
        if self.instances.contains_key(&record.id) {
            return Err(AppError::invalid_state(format!(
                "Instance id {} already exists",
                record.id
            )));
        }
        if let Some(existing) = self.instance_by_name(&record.name) {
            return Err(AppError::name_conflict(&record.name, &existing.id));
        }
        self.instances.insert(record.id.clone(), record);
        Ok(())
    }

    fn insert_service(&mut self, record: ServiceRecord) -> Result<()> {
        if !self.instances.contains_key(&record.instance_id) {
            return Err(AppError::instance_not_found(&record.instance_id));
        }
        if self
            .services
            .iter()
            .any(|s| s.instance_id == record.instance_id && s.name == record.name)
        {
            return Err(AppError::invalid_state(format!(
                "Service {} already exists for instance {}",
                record.name, record.instance_id
            )));
        }
        self.services.push(record);
        Ok(())
    }

    fn instance_by_name(&self, name: &str) -> Option<&InstanceRecord> {
        self.instances.values().find(|i| i.name == name)
    }

    fn set_instance_status(&mut self, id: &str, status: Status) -> Result<()> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| AppError::instance_not_found(id))?;
        instance.status = status;
        Ok(())
    }

    fn set_service_status(&mut self, instance_id: &str, name: &str, status: Status) -> Result<()> {
        let service = self
            .services
            .iter_mut()
            .find(|s| s.instance_id == instance_id && s.name == name)
            .ok_or_else(|| AppError::service_not_found(instance_id, name))?;
        service.status = status;
        Ok(())
    }

    fn remove_instance(&mut self, id: &str) -> Result<()> {
        self.instances
            .remove(id)
            .ok_or_else(|| AppError::instance_not_found(id))?;
        self.services.retain(|s| s.instance_id != id);
        Ok(())
    }
}

impl<B: StoreBackend> Store for B {
    fn create_instance(&self, record: InstanceRecord) -> Result<()> {
        self.write(|data| data.insert_instance(record))
    }

    fn update_instance_status(&self, id: &str, status: Status) -> Result<()> {
        self.write(|data| data.set_instance_status(id, status))
    }

    fn delete_instance(&self, id: &str) -> Result<()> {
        self.write(|data| data.remove_instance(id))
    }

    fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>> {
        self.read(|data| data.instances.get(id).cloned())
    }

    fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        self.read(|data| {
            let mut instances: Vec<InstanceRecord> = data.instances.values().cloned().collect();
            instances.sort_by(|a, b| a.installed_at.cmp(&b.installed_at));
            instances
        })
    }

    fn find_instance_by_name(&self, name: &str) -> Result<Option<InstanceRecord>> {
        self.read(|data| data.instance_by_name(name).cloned())
    }

    fn create_service(&self, record: ServiceRecord) -> Result<()> {
        self.write(|data| data.insert_service(record))
    }

    fn update_service_status(&self, instance_id: &str, name: &str, status: Status) -> Result<()> {
        self.write(|data| data.set_service_status(instance_id, name, status))
    }

    fn list_services(&self, instance_id: &str) -> Result<Vec<ServiceRecord>> {
        self.read(|data| {
            data.services
                .iter()
                .filter(|s| s.instance_id == instance_id)
                .cloned()
                .collect()
        })
    }

    fn create_instance_with_services(
        &self,
        instance: InstanceRecord,
        services: Vec<ServiceRecord>,
    ) -> Result<()> {
        self.write(|data| {
            let mut staged = data.clone();
            staged.insert_instance(instance)?;
            for service in services {
                staged.insert_service(service)?;
            }
            *data = staged;
            Ok(())
        })
    }
}
