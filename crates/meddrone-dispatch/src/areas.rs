//! Dynamically managed restricted areas.
//!
//! The merged view seen by the planner is the externally fetched set plus a
//! locally managed set that operators can mutate at runtime. Structural
//! changes to the dynamic set go through a single-writer lock; ids must stay
//! unique across the merged view.

use meddrone_core::error::DispatchError;
use meddrone_core::models::RestrictedArea;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct RestrictedAreaRegistry {
    external: Vec<RestrictedArea>,
    dynamic: Mutex<Vec<RestrictedArea>>,
}

impl RestrictedAreaRegistry {
    pub fn new(external: Vec<RestrictedArea>) -> Self {
        Self {
            external,
            dynamic: Mutex::new(Vec::new()),
        }
    }

    fn dynamic_guard(&self) -> MutexGuard<'_, Vec<RestrictedArea>> {
        self.dynamic.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an operator-defined area. Ids must be unique across the merged
    /// set, including the external areas.
    pub fn add(&self, area: RestrictedArea) -> Result<(), DispatchError> {
        let mut dynamic = self.dynamic_guard();
        let duplicate = self.external.iter().chain(dynamic.iter()).any(|a| a.id == area.id);
        if duplicate {
            return Err(DispatchError::Validation(format!(
                "restricted area id {} already exists",
                area.id
            )));
        }
        dynamic.push(area);
        Ok(())
    }

    /// Remove a dynamic area by name. External areas cannot be removed here.
    pub fn remove_by_name(&self, name: &str) -> Result<RestrictedArea, DispatchError> {
        let mut dynamic = self.dynamic_guard();
        let Some(idx) = dynamic.iter().position(|a| a.name == name) else {
            return Err(DispatchError::Validation(format!(
                "no dynamic restricted area named {name}"
            )));
        };
        Ok(dynamic.remove(idx))
    }

    pub fn clear(&self) {
        self.dynamic_guard().clear();
    }

    pub fn dynamic_only(&self) -> Vec<RestrictedArea> {
        self.dynamic_guard().clone()
    }

    /// External set plus the dynamic set, in that order.
    pub fn merged(&self) -> Vec<RestrictedArea> {
        let dynamic = self.dynamic_guard();
        let mut merged = Vec::with_capacity(self.external.len() + dynamic.len());
        merged.extend(self.external.iter().cloned());
        merged.extend(dynamic.iter().cloned());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meddrone_core::models::Position;

    fn area(id: i64, name: &str) -> RestrictedArea {
        RestrictedArea {
            id,
            name: name.to_string(),
            vertices: vec![
                Position { lng: 0.0, lat: 0.0 },
                Position { lng: 1.0, lat: 0.0 },
                Position { lng: 0.0, lat: 1.0 },
            ],
        }
    }

    #[test]
    fn duplicate_ids_are_rejected_across_the_merged_set() {
        let registry = RestrictedAreaRegistry::new(vec![area(1, "external")]);
        assert!(registry.add(area(1, "clash")).is_err());
        registry.add(area(2, "fresh")).unwrap();
        assert!(registry.add(area(2, "clash again")).is_err());
    }

    #[test]
    fn remove_by_name_errors_on_unknown_name() {
        let registry = RestrictedAreaRegistry::new(Vec::new());
        registry.add(area(1, "hospital")).unwrap();
        assert!(registry.remove_by_name("school").is_err());
        let removed = registry.remove_by_name("hospital").unwrap();
        assert_eq!(removed.id, 1);
        assert!(registry.dynamic_only().is_empty());
    }

    #[test]
    fn merged_view_combines_both_sources() {
        let registry = RestrictedAreaRegistry::new(vec![area(1, "external")]);
        registry.add(area(2, "dynamic")).unwrap();
        let merged = registry.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(registry.dynamic_only().len(), 1);
        registry.clear();
        assert_eq!(registry.merged().len(), 1);
    }
}
