use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{RegistryError, Result};
use crate::model::{Locality, Unit};

/// On-disk layout of the registry file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub localities: Vec<Locality>,
}

impl Registry {
    fn locality(&self, name: &str) -> Option<&Locality> {
        self.localities.iter().find(|l| l.name == name)
    }

    fn locality_mut(&mut self, name: &str) -> Option<&mut Locality> {
        self.localities.iter_mut().find(|l| l.name == name)
    }
}

/// Durable mapping from (locality, unit name) to unit records.
///
/// Every mutation is applied to a copy of the registry, written to disk, and only then
/// made visible. A failed write leaves the store exactly as it was.
#[derive(Debug)]
pub struct RecordStore {
    path: Option<PathBuf>,
    registry: Registry,
}

impl RecordStore {
    /// Store that lives only in memory.
    pub fn in_memory() -> Self {
        RecordStore {
            path: None,
            registry: Registry::default(),
        }
    }

    /// Opens the registry file, creating its directory and an empty registry if needed.
    ///
    /// # Errors
    /// * `Storage` if the directory or file cannot be created or read
    /// * `Serialization` if the file exists but is not a valid registry
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }

        let registry = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Registry::default()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            Registry::default()
        };

        let store = RecordStore {
            path: Some(path),
            registry,
        };
        if !store.path().is_some_and(Path::exists) {
            store.persist(&store.registry)?;
        }
        info!(
            "Opened registry with {} localities and {} units",
            store.registry.localities.len(),
            store.registry.localities.iter().map(|l| l.units.len()).sum::<usize>()
        );
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Registers an empty locality.
    ///
    /// # Errors
    /// * `Validation` if the name is empty
    /// * `Conflict` if the locality already exists
    pub fn create_locality(&mut self, name: &str) -> Result<&Locality> {
        let name = required(name, "o nome da localidade é obrigatório")?;
        if self.registry.locality(name).is_some() {
            return Err(RegistryError::Conflict(format!(
                "a localidade '{}' já existe",
                name
            )));
        }

        let mut next = self.registry.clone();
        next.localities.push(Locality::new(name));
        self.commit(next)?;
        info!("Created locality '{}'", name);

        let index = self.registry.localities.len() - 1;
        Ok(&self.registry.localities[index])
    }

    pub fn list_localities(&self) -> Vec<&Locality> {
        self.registry.localities.iter().collect()
    }

    /// Adds a unit, creating the locality on first use.
    ///
    /// # Errors
    /// * `Validation` if the locality or unit name is empty
    /// * `Conflict` if the locality already has a unit with that name; the existing
    ///   record is left untouched
    pub fn create_unit(&mut self, locality: &str, mut unit: Unit) -> Result<&Unit> {
        let locality = required(locality, "o nome da localidade é obrigatório")?;
        unit.name = required(&unit.name, "o nome da unidade é obrigatório")?.to_string();

        if self
            .registry
            .locality(locality)
            .is_some_and(|l| l.unit(&unit.name).is_some())
        {
            return Err(RegistryError::Conflict(format!(
                "a unidade '{}' já existe em '{}'",
                unit.name, locality
            )));
        }

        let mut next = self.registry.clone();
        if next.locality(locality).is_none() {
            info!("Creating locality '{}' for first unit", locality);
            next.localities.push(Locality::new(locality));
        }
        let unit_name = unit.name.clone();
        if let Some(target) = next.locality_mut(locality) {
            target.units.push(unit);
        }
        self.commit(next)?;
        info!("Registered unit '{}' in '{}'", unit_name, locality);

        self.get_unit(locality, &unit_name)
    }

    /// Replaces a unit's attributes and measurements, keeping its id and creation time.
    ///
    /// # Errors
    /// * `NotFound` if the unit does not exist
    /// * `Conflict` if the unit is renamed onto another unit of the same locality
    pub fn update_unit(&mut self, locality: &str, name: &str, mut unit: Unit) -> Result<&Unit> {
        unit.name = required(&unit.name, "o nome da unidade é obrigatório")?.to_string();
        let current = self.get_unit(locality, name)?;
        unit.id = current.id;
        unit.created_at = current.created_at;

        if unit.name != name
            && self
                .registry
                .locality(locality)
                .is_some_and(|l| l.unit(&unit.name).is_some())
        {
            return Err(RegistryError::Conflict(format!(
                "a unidade '{}' já existe em '{}'",
                unit.name, locality
            )));
        }

        let mut next = self.registry.clone();
        let new_name = unit.name.clone();
        if let Some(slot) = next
            .locality_mut(locality)
            .and_then(|l| l.units.iter_mut().find(|u| u.name == name))
        {
            *slot = unit;
        }
        self.commit(next)?;
        info!("Updated unit '{}' in '{}'", new_name, locality);

        self.get_unit(locality, &new_name)
    }

    /// Removes a unit together with its measurements.
    ///
    /// # Errors
    /// * `NotFound` if the unit does not exist
    pub fn delete_unit(&mut self, locality: &str, name: &str) -> Result<Unit> {
        let removed = self.get_unit(locality, name)?.clone();

        let mut next = self.registry.clone();
        if let Some(target) = next.locality_mut(locality) {
            target.units.retain(|u| u.name != name);
        }
        self.commit(next)?;
        info!("Deleted unit '{}' from '{}'", name, locality);
        Ok(removed)
    }

    /// Units of one locality, or of all localities, in insertion order.
    ///
    /// # Errors
    /// * `NotFound` if a locality filter names an unknown locality
    pub fn list_units(&self, locality: Option<&str>) -> Result<Vec<(&str, &Unit)>> {
        let localities: Vec<&Locality> = match locality {
            Some(name) => vec![
                self.registry
                    .locality(name)
                    .ok_or_else(|| not_found_locality(name))?,
            ],
            None => self.registry.localities.iter().collect(),
        };

        Ok(localities
            .into_iter()
            .flat_map(|l| l.units.iter().map(move |u| (l.name.as_str(), u)))
            .collect())
    }

    /// # Errors
    /// * `NotFound` if the locality or unit does not exist
    pub fn get_unit(&self, locality: &str, name: &str) -> Result<&Unit> {
        self.registry
            .locality(locality)
            .ok_or_else(|| not_found_locality(locality))?
            .unit(name)
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "unidade '{}' não encontrada em '{}'",
                    name, locality
                ))
            })
    }

    fn commit(&mut self, next: Registry) -> Result<()> {
        if let Err(e) = self.persist(&next) {
            error!("Failed to write registry, submission discarded: {}", e);
            return Err(e);
        }
        self.registry = next;
        Ok(())
    }

    fn persist(&self, registry: &Registry) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(registry)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(json.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(RegistryError::Validation(message.to_string()))
    } else {
        Ok(value)
    }
}

fn not_found_locality(name: &str) -> RegistryError {
    RegistryError::NotFound(format!("localidade '{}' não encontrada", name))
}
