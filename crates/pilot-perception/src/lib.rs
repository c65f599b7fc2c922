//! Perception boundary for Pilot
//!
//! The surface is read as a raw [`SurfaceNode`] tree (cheap) and parsed into a
//! [`Snapshot`] of addressable elements (expensive). This crate provides:
//!
//! - **[`Perception`]**: the boundary trait implemented by concrete screen readers
//! - **[`ChangeDetector`]**: fingerprint cache that skips the parse when nothing changed
//! - **[`ElementRegistry`]**: id → bounds lookup, replaced wholesale every cycle
//!
//! # Example
//!
//! ```no_run
//! use pilot_perception::{ChangeDetector, ElementRegistry, Perception};
//!
//! async fn perceive(surface: &dyn Perception) -> pilot_core::Result<()> {
//!     let mut detector = ChangeDetector::new(300);
//!     let registry = ElementRegistry::new();
//!
//!     let capture = detector.capture(surface).await?;
//!     registry.replace(&capture.snapshot);
//!     println!("{}", capture.snapshot.description);
//!     Ok(())
//! }
//! ```

pub mod change_detector;
pub mod fingerprint;
pub mod registry;
pub mod tree;

use async_trait::async_trait;
use pilot_core::{Result, Snapshot};

pub use change_detector::{Capture, ChangeDetector, DetectorStats};
pub use fingerprint::fingerprint;
pub use registry::{ElementRegistry, RegistryGeneration};
pub use tree::{parse_tree, SurfaceNode};

/// Source of surface state
///
/// Implementations must tolerate repeated calls and must not rely on state
/// from a previous call.
#[async_trait]
pub trait Perception: Send + Sync {
    /// Read the raw surface tree
    async fn read_tree(&self) -> Result<SurfaceNode>;

    /// Parse a tree into a snapshot of at most `max_elements` elements
    async fn capture(&self, tree: &SurfaceNode, max_elements: usize) -> Result<Snapshot> {
        Ok(parse_tree(tree, max_elements))
    }
}
