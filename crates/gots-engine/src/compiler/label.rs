//! Memory & Label Resolver: tracks forward references as `(label,
//! patch-site)` pairs and resolves them the moment the label is
//! declared. Anything still unresolved when the buffer is sealed is a
//! `LinkError` (spec.md §4.5).

use crate::error::LinkError;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchWidth {
    /// A 32-bit PC-relative displacement, patched relative to the byte
    /// immediately following the patched field.
    Rel32,
    /// A 64-bit absolute address.
    Abs64,
}

#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    pub offset: usize,
    pub width: PatchWidth,
}

#[derive(Debug, Default)]
pub struct LabelResolver {
    next_id: u32,
    positions: FxHashMap<Label, usize>,
    pending: FxHashMap<Label, Vec<PatchSite>>,
}

impl LabelResolver {
    pub fn new() -> Self {
        LabelResolver::default()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_id);
        self.next_id += 1;
        label
    }

    /// Declares `label` at `offset`. Returns every patch site that was
    /// waiting on it, ready for the caller to write into the buffer.
    pub fn declare(&mut self, label: Label, offset: usize) -> Vec<PatchSite> {
        self.positions.insert(label, offset);
        self.pending.remove(&label).unwrap_or_default()
    }

    /// Registers a reference to `label` at `patch_site`. Returns the
    /// target offset immediately if the label is already declared,
    /// otherwise queues the site for when `declare` is called.
    pub fn reference(&mut self, label: Label, patch_site: PatchSite) -> Option<usize> {
        if let Some(&offset) = self.positions.get(&label) {
            Some(offset)
        } else {
            self.pending.entry(label).or_default().push(patch_site);
            None
        }
    }

    pub fn offset_of(&self, label: Label) -> Option<usize> {
        self.positions.get(&label).copied()
    }

    /// Call once the owning code buffer is sealed. Any label with a
    /// nonempty pending list never got declared.
    pub fn finish(&self) -> Result<(), LinkError> {
        for (label, sites) in &self.pending {
            if let Some(site) = sites.first() {
                return Err(LinkError::UnresolvedLabel {
                    label: format!("L{}", label.0),
                    patch_site: site.offset,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_reference_resolves_once_label_is_declared() {
        let mut resolver = LabelResolver::new();
        let label = resolver.new_label();
        let site = PatchSite {
            offset: 10,
            width: PatchWidth::Rel32,
        };
        assert!(resolver.reference(label, site).is_none());
        let resolved = resolver.declare(label, 42);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].offset, 10);
        assert_eq!(resolver.offset_of(label), Some(42));
        assert!(resolver.finish().is_ok());
    }

    #[test]
    fn backward_reference_resolves_immediately() {
        let mut resolver = LabelResolver::new();
        let label = resolver.new_label();
        resolver.declare(label, 5);
        let site = PatchSite {
            offset: 20,
            width: PatchWidth::Abs64,
        };
        assert_eq!(resolver.reference(label, site), Some(5));
    }

    #[test]
    fn unresolved_label_at_seal_is_a_link_error() {
        let mut resolver = LabelResolver::new();
        let label = resolver.new_label();
        resolver.reference(
            label,
            PatchSite {
                offset: 3,
                width: PatchWidth::Rel32,
            },
        );
        let err = resolver.finish().unwrap_err();
        assert!(matches!(err, LinkError::UnresolvedLabel { .. }));
    }
}
