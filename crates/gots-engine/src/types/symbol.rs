//! Scope-chained symbol table: tracks declarations and their stack offsets
//! or global slots, grounded in the same scope-tree shape the checker
//! uses for name resolution (scopes form a tree, lookup walks parents).

use super::Ty;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Where a symbol's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Negative displacement from the frame base, locals grow downward.
    Local { offset: i32 },
    /// Negative displacement from the frame base, same counter as
    /// `Local` (params are spilled into the frame by the prologue
    /// before the body runs, so they share its slot space).
    Param { offset: i32 },
    /// A module-global slot index.
    Global { slot: u32 },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Ty,
    pub storage: Storage,
    pub mutable: bool,
    pub class_name: Option<String>,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    symbols: FxHashMap<String, Symbol>,
}

/// Scope-chained symbol table. One instance per function being compiled;
/// a separate instance (or the root scope of this one) tracks module
/// globals.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: ScopeId,
    next_local_offset: i32,
    next_global_slot: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
            current: ScopeId(0),
            next_local_offset: -8,
            next_global_slot: 0,
        }
    }

    pub fn push_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(self.current),
            symbols: FxHashMap::default(),
        });
        self.current = id;
        id
    }

    pub fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current.0 as usize].parent {
            self.current = parent;
        }
    }

    /// Declares a local, assigning it the next 8-byte slot growing
    /// downward from the frame base (spec.md §4.3).
    pub fn declare_local(&mut self, name: &str, ty: Ty, mutable: bool) -> Symbol {
        let offset = self.next_local_offset;
        self.next_local_offset -= 8;
        let sym = Symbol {
            name: name.to_string(),
            ty,
            storage: Storage::Local { offset },
            mutable,
            class_name: None,
        };
        self.scopes[self.current.0 as usize]
            .symbols
            .insert(name.to_string(), sym.clone());
        sym
    }

    /// Declares a parameter, assigning it the next 8-byte slot from the
    /// same downward-growing counter `declare_local` uses. Call this
    /// for every parameter (`this` first, then the declared parameters
    /// left to right) before declaring any local, so the prologue's
    /// argument-spill loop and the body's local slots never collide.
    pub fn declare_param(&mut self, name: &str, ty: Ty) -> Symbol {
        let offset = self.next_local_offset;
        self.next_local_offset -= 8;
        let sym = Symbol {
            name: name.to_string(),
            ty,
            storage: Storage::Param { offset },
            mutable: true,
            class_name: None,
        };
        self.scopes[self.current.0 as usize]
            .symbols
            .insert(name.to_string(), sym.clone());
        sym
    }

    pub fn declare_global(&mut self, name: &str, ty: Ty, mutable: bool) -> Symbol {
        let slot = self.next_global_slot;
        self.next_global_slot += 1;
        let sym = Symbol {
            name: name.to_string(),
            ty,
            storage: Storage::Global { slot },
            mutable,
            class_name: None,
        };
        self.scopes[0].symbols.insert(name.to_string(), sym.clone());
        sym
    }

    /// Resolves a name by walking the scope chain from the current scope
    /// up to the module root.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        let mut scope_id = Some(self.current);
        while let Some(id) = scope_id {
            let scope = &self.scopes[id.0 as usize];
            if let Some(sym) = scope.symbols.get(name) {
                return Some(sym);
            }
            scope_id = scope.parent;
        }
        None
    }

    /// Bytes of local storage reserved so far (used to size the stack
    /// frame in the prologue).
    pub fn frame_size(&self) -> usize {
        (-self.next_local_offset) as usize
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
