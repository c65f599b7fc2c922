//! Structural fingerprint of a surface tree
//!
//! Folds node identity, type, text, label and enabled/checked state of every
//! node, recursively, into a SHA-256 digest. Geometry is not part of the
//! fingerprint; the change detector checks dimensions separately.

use sha2::{Digest, Sha256};

use crate::tree::SurfaceNode;

/// Compute the hex fingerprint of a tree
pub fn fingerprint(root: &SurfaceNode) -> String {
    let mut hasher = Sha256::new();
    hash_node(&mut hasher, root);
    hex::encode(hasher.finalize())
}

fn hash_node(hasher: &mut Sha256, node: &SurfaceNode) {
    hash_str(hasher, &node.id);
    hash_str(hasher, &node.node_type);
    hash_str(hasher, &node.text);
    hash_str(hasher, &node.label);
    hash_flag(hasher, node.enabled, "enabled");
    hash_flag(hasher, node.checked, "checked");

    // Child count separates siblings from descendants
    hasher.update((node.children.len() as u64).to_le_bytes());
    for child in &node.children {
        hash_node(hasher, child);
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update(s.as_bytes());
    hasher.update([0]);
}

fn hash_flag(hasher: &mut Sha256, b: bool, label: &str) {
    if b {
        hasher.update(label.as_bytes());
    }
    hasher.update([0]);
}
