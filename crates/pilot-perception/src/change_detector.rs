//! Change detector: skips the full perception parse when nothing changed
//!
//! Each capture reads the raw tree, fingerprints it, and compares against the
//! previous capture. A hit returns the cached snapshot (the same `Arc`); a
//! miss runs the full, element-bounded parse and replaces the cache.

use pilot_core::{PilotError, Result, Snapshot};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::fingerprint::fingerprint;
use crate::tree::SurfaceNode;
use crate::Perception;

/// Result of one capture
#[derive(Debug, Clone)]
pub struct Capture {
    pub snapshot: Arc<Snapshot>,
    pub cache_hit: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub hits: u64,
    pub misses: u64,
}

/// Fingerprint cache in front of a [`Perception`] source
#[derive(Debug)]
pub struct ChangeDetector {
    max_elements: usize,
    last_fingerprint: Option<String>,
    cached: Option<Arc<Snapshot>>,
    stats: DetectorStats,
}

impl ChangeDetector {
    pub fn new(max_elements: usize) -> Self {
        Self {
            max_elements,
            last_fingerprint: None,
            cached: None,
            stats: DetectorStats::default(),
        }
    }

    /// Capture the current surface, reusing the cached snapshot when the
    /// structure is unchanged
    #[instrument(skip(self, perception))]
    pub async fn capture(&mut self, perception: &dyn Perception) -> Result<Capture> {
        let tree = perception.read_tree().await?;
        let current = fingerprint(&tree);

        if let Some(cached) = self.reusable(&current, &tree) {
            self.stats.hits += 1;
            debug!("Surface unchanged ({}), reusing snapshot", &current[..12]);
            return Ok(Capture {
                snapshot: cached,
                cache_hit: true,
            });
        }

        self.stats.misses += 1;
        let mut snapshot = perception.capture(&tree, self.max_elements).await?;
        if snapshot.elements.len() > self.max_elements {
            return Err(PilotError::Perception(format!(
                "parser returned {} elements, limit is {}",
                snapshot.elements.len(),
                self.max_elements
            )));
        }
        snapshot.fingerprint = current.clone();

        let snapshot = Arc::new(snapshot);
        debug!(
            "Surface changed ({}), parsed {} elements",
            &current[..12],
            snapshot.elements.len()
        );
        self.last_fingerprint = Some(current);
        self.cached = Some(snapshot.clone());

        Ok(Capture {
            snapshot,
            cache_hit: false,
        })
    }

    fn reusable(&self, current: &str, tree: &SurfaceNode) -> Option<Arc<Snapshot>> {
        let cached = self.cached.as_ref()?;
        let same_structure = self.last_fingerprint.as_deref() == Some(current);
        let compatible =
            cached.width == tree.bounds.width() && cached.height == tree.bounds.height();

        (same_structure && !cached.is_empty() && compatible).then(|| cached.clone())
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn cached(&self) -> Option<Arc<Snapshot>> {
        self.cached.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pilot_core::Bounds;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSurface {
        tree: Mutex<SurfaceNode>,
        parses: AtomicUsize,
    }

    impl CountingSurface {
        fn new(tree: SurfaceNode) -> Self {
            Self {
                tree: Mutex::new(tree),
                parses: AtomicUsize::new(0),
            }
        }

        fn set_tree(&self, tree: SurfaceNode) {
            *self.tree.lock().unwrap() = tree;
        }

        fn parses(&self) -> usize {
            self.parses.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Perception for CountingSurface {
        async fn read_tree(&self) -> Result<SurfaceNode> {
            Ok(self.tree.lock().unwrap().clone())
        }

        async fn capture(&self, tree: &SurfaceNode, max_elements: usize) -> Result<Snapshot> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            Ok(crate::tree::parse_tree(tree, max_elements))
        }
    }

    fn screen(label: &str, width: i32) -> SurfaceNode {
        SurfaceNode::new("root", "frame")
            .with_bounds(Bounds::new(0, 0, width, 2400))
            .with_child(
                SurfaceNode::new("btn", "button")
                    .with_text(label)
                    .with_bounds(Bounds::new(0, 0, 200, 100))
                    .clickable(),
            )
    }

    #[tokio::test]
    async fn test_unchanged_surface_hits_cache() {
        let surface = CountingSurface::new(screen("Login", 1080));
        let mut detector = ChangeDetector::new(100);

        let first = detector.capture(&surface).await.unwrap();
        let second = detector.capture(&surface).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(surface.parses(), 1);
        assert_eq!(detector.stats(), DetectorStats { hits: 1, misses: 1 });
        assert_eq!(first.snapshot.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_changed_surface_reparses() {
        let surface = CountingSurface::new(screen("Login", 1080));
        let mut detector = ChangeDetector::new(100);

        let first = detector.capture(&surface).await.unwrap();
        surface.set_tree(screen("Logout", 1080));
        let second = detector.capture(&surface).await.unwrap();

        assert!(!second.cache_hit);
        assert_ne!(first.snapshot.fingerprint, second.snapshot.fingerprint);
        assert_eq!(second.snapshot.elements[0].label, "Logout");
        assert_eq!(surface.parses(), 2);
    }

    #[tokio::test]
    async fn test_dimension_change_reparses() {
        let surface = CountingSurface::new(screen("Login", 1080));
        let mut detector = ChangeDetector::new(100);

        detector.capture(&surface).await.unwrap();
        // Rotation: same structure, different size
        surface.set_tree(screen("Login", 2400));
        let capture = detector.capture(&surface).await.unwrap();

        assert!(!capture.cache_hit);
        assert_eq!(capture.snapshot.width, 2400);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_never_reused() {
        let empty = SurfaceNode::new("root", "frame").with_bounds(Bounds::new(0, 0, 1080, 2400));
        let surface = CountingSurface::new(empty);
        let mut detector = ChangeDetector::new(100);

        detector.capture(&surface).await.unwrap();
        let capture = detector.capture(&surface).await.unwrap();

        assert!(!capture.cache_hit);
        assert_eq!(surface.parses(), 2);
    }
}
