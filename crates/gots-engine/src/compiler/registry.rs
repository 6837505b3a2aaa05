//! Function Registry: maps a function's name and its small integer id
//! to its final executable address. Append-only — addresses never move
//! once registered, since the executable memory backing them is never
//! unmapped (spec.md §4.7).

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct Inner {
    addresses: Vec<usize>,
    by_name: FxHashMap<String, u32>,
}

/// Shared, thread-safe: the scheduler's worker threads all dereference
/// function addresses concurrently with compilation of further modules.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    inner: RwLock<Inner>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// Registers `name` at `address`, returning its newly assigned id.
    pub fn register(&self, name: &str, address: usize) -> u32 {
        let mut inner = self.inner.write();
        let id = inner.addresses.len() as u32;
        inner.addresses.push(address);
        inner.by_name.insert(name.to_string(), id);
        id
    }

    pub fn address_by_id(&self, id: u32) -> Option<usize> {
        self.inner.read().addresses.get(id as usize).copied()
    }

    pub fn address_by_name(&self, name: &str) -> Option<usize> {
        let inner = self.inner.read();
        let id = *inner.by_name.get(name)?;
        inner.addresses.get(id as usize).copied()
    }

    pub fn id_by_name(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_addresses_are_retrievable_by_name_and_id() {
        let registry = FunctionRegistry::new();
        let id = registry.register("main", 0x1000);
        assert_eq!(registry.address_by_id(id), Some(0x1000));
        assert_eq!(registry.address_by_name("main"), Some(0x1000));
        assert_eq!(registry.id_by_name("main"), Some(0));
    }

    #[test]
    fn addresses_never_move_as_more_functions_register() {
        let registry = FunctionRegistry::new();
        let a = registry.register("a", 0x100);
        registry.register("b", 0x200);
        registry.register("c", 0x300);
        assert_eq!(registry.address_by_id(a), Some(0x100));
        assert_eq!(registry.len(), 3);
    }
}
