//! Element registry: element id → bounds for the current snapshot
//!
//! One registry is owned per orchestrator and shared with the action
//! executor. Every perception cycle swaps in a complete new generation, so a
//! reader sees either the old mapping or the new one, never a mix. Ids that
//! are absent from the current generation fail to resolve.

use pilot_core::{Bounds, PilotError, Point, Result, Snapshot, Target};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// One immutable registry generation
#[derive(Debug, Default)]
pub struct RegistryGeneration {
    pub generation: u64,
    pub fingerprint: String,
    elements: HashMap<u32, Bounds>,
}

impl RegistryGeneration {
    pub fn get(&self, id: u32) -> Option<Bounds> {
        self.elements.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Shared element registry with atomic whole-generation replacement
#[derive(Debug, Default)]
pub struct ElementRegistry {
    current: RwLock<Arc<RegistryGeneration>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping with the elements of `snapshot`
    ///
    /// Returns the new generation number.
    pub fn replace(&self, snapshot: &Snapshot) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let generation = guard.generation + 1;
        let elements = snapshot
            .elements
            .iter()
            .map(|element| (element.id, element.bounds))
            .collect();

        *guard = Arc::new(RegistryGeneration {
            generation,
            fingerprint: snapshot.fingerprint.clone(),
            elements,
        });

        debug!(
            "Element registry generation {} ({} elements)",
            generation,
            snapshot.elements.len()
        );
        generation
    }

    /// Drop every mapping (new generation with no elements)
    pub fn clear(&self) {
        self.replace(&Snapshot::default());
    }

    /// Current generation; stays consistent for as long as the caller holds it
    pub fn current(&self) -> Arc<RegistryGeneration> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn lookup(&self, id: u32) -> Option<Bounds> {
        self.current().get(id)
    }

    /// Resolve a target to absolute coordinates
    pub fn resolve(&self, target: Target) -> Result<Point> {
        match target {
            Target::Point(point) => Ok(point),
            Target::Element(id) => self
                .lookup(id)
                .map(|bounds| bounds.center())
                .ok_or(PilotError::ElementNotFound(id)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.current().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::Element;

    fn snapshot(ids: &[u32]) -> Snapshot {
        Snapshot {
            elements: ids
                .iter()
                .map(|id| Element {
                    id: *id,
                    bounds: Bounds::new(0, *id as i32 * 100, 100, *id as i32 * 100 + 50),
                    label: format!("item {}", id),
                    element_type: "button".into(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_element_to_center() {
        let registry = ElementRegistry::new();
        registry.replace(&snapshot(&[1, 2]));
        assert_eq!(
            registry.resolve(Target::Element(2)).unwrap(),
            Point::new(50, 225)
        );
        assert_eq!(
            registry.resolve(Target::Point(Point::new(3, 4))).unwrap(),
            Point::new(3, 4)
        );
    }

    #[test]
    fn test_replace_drops_stale_ids() {
        let registry = ElementRegistry::new();
        registry.replace(&snapshot(&[1, 2, 3]));
        registry.replace(&snapshot(&[1]));

        assert!(registry.lookup(1).is_some());
        assert!(registry.lookup(3).is_none());
        assert!(matches!(
            registry.resolve(Target::Element(3)),
            Err(PilotError::ElementNotFound(3))
        ));
    }

    #[test]
    fn test_generation_is_monotonic() {
        let registry = ElementRegistry::new();
        assert_eq!(registry.generation(), 0);
        assert_eq!(registry.replace(&snapshot(&[1])), 1);
        assert_eq!(registry.replace(&snapshot(&[1])), 2);
        registry.clear();
        assert_eq!(registry.generation(), 3);
        assert!(registry.current().is_empty());
    }

    #[test]
    fn test_held_generation_is_unaffected_by_replace() {
        let registry = ElementRegistry::new();
        registry.replace(&snapshot(&[1, 2]));
        let held = registry.current();
        registry.replace(&snapshot(&[7]));

        assert_eq!(held.len(), 2);
        assert!(held.get(2).is_some());
        assert!(registry.lookup(2).is_none());
    }

    #[test]
    fn test_concurrent_readers_see_whole_generations() {
        let registry = Arc::new(ElementRegistry::new());
        registry.replace(&snapshot(&[1, 2, 3]));

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        registry.replace(&snapshot(&[4, 5]));
                    } else {
                        registry.replace(&snapshot(&[1, 2, 3]));
                    }
                }
            })
        };

        for _ in 0..200 {
            let generation = registry.current();
            let len = generation.len();
            assert!(len == 2 || len == 3, "partial generation of {} elements", len);
        }
        writer.join().unwrap();
    }
}
