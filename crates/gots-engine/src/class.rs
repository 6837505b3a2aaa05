//! Class object model: single inheritance, dense field layout, and a
//! vtable-free method table (each method resolves to a function-registry
//! id at link time). Grounded in the shape of the reference workspace's
//! class registry, narrowed from its multi-interface model down to the
//! single-parent inheritance this engine's type lattice requires.

use crate::types::Ty;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub name: String,
    pub ty: Ty,
    /// Byte offset from the start of the instance, parent fields first.
    pub offset: usize,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct MethodSlot {
    pub name: String,
    pub param_tys: Vec<Ty>,
    pub ret_ty: Ty,
    /// Resolved once the method body has been compiled and registered.
    pub function_id: Option<u32>,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct ConstructorSlot {
    pub param_tys: Vec<Ty>,
    pub function_id: Option<u32>,
}

/// One class's shape: field layout and method table, including fields
/// and methods inherited from its parent.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldSlot>,
    pub methods: Vec<MethodSlot>,
    pub constructor: Option<ConstructorSlot>,
    /// Instance size in bytes: `fields.len() * 8`, all fields boxed to a
    /// uniform 8-byte slot like locals are (spec.md §4.3).
    pub instance_size: usize,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodSlot> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassError {
    #[error("class `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("parent class `{0}` is not registered")]
    UnknownParent(String),
}

/// Registry of every class declared in a module, keyed by name. Classes
/// must be registered in declaration order after their parent (if any)
/// is already present, since field layout is computed by appending to
/// the parent's layout.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: FxHashMap<String, ClassInfo>,
}

impl ClassTable {
    pub fn new() -> Self {
        ClassTable {
            classes: FxHashMap::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registers a class, laying out `own_fields` after the parent's
    /// fields (if any) in declaration order.
    pub fn register(
        &mut self,
        name: &str,
        parent: Option<&str>,
        own_fields: Vec<(String, Ty, bool)>,
        own_methods: Vec<MethodSlot>,
        constructor: Option<ConstructorSlot>,
    ) -> Result<(), ClassError> {
        if self.classes.contains_key(name) {
            return Err(ClassError::AlreadyRegistered(name.to_string()));
        }

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        if let Some(parent_name) = parent {
            let parent_info = self
                .classes
                .get(parent_name)
                .ok_or_else(|| ClassError::UnknownParent(parent_name.to_string()))?;
            fields.extend(parent_info.fields.clone());
            methods.extend(parent_info.methods.clone());
        }

        let mut offset = fields.len() * 8;
        for (fname, fty, is_static) in own_fields {
            fields.push(FieldSlot {
                name: fname,
                ty: fty,
                offset,
                is_static,
            });
            offset += 8;
        }

        // Own methods override an inherited method of the same name
        // (single dispatch, last-declared wins).
        for m in own_methods {
            if let Some(existing) = methods.iter_mut().find(|e: &&mut MethodSlot| e.name == m.name) {
                *existing = m;
            } else {
                methods.push(m);
            }
        }

        let instance_size = fields.len() * 8;
        self.classes.insert(
            name.to_string(),
            ClassInfo {
                name: name.to_string(),
                parent: parent.map(|p| p.to_string()),
                fields,
                methods,
                constructor,
                instance_size,
            },
        );
        Ok(())
    }

    /// True if `child` is `ancestor` or descends from it, walking the
    /// single-inheritance chain.
    pub fn is_subclass(&self, child: &str, ancestor: &str) -> bool {
        if child == ancestor {
            return true;
        }
        let mut current = self.classes.get(child);
        while let Some(info) = current {
            match &info.parent {
                Some(p) if p == ancestor => return true,
                Some(p) => current = self.classes.get(p),
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_class_fields_get_dense_offsets() {
        let mut table = ClassTable::new();
        table
            .register(
                "Point",
                None,
                vec![
                    ("x".to_string(), Ty::F64, false),
                    ("y".to_string(), Ty::F64, false),
                ],
                vec![],
                None,
            )
            .unwrap();
        let point = table.get("Point").unwrap();
        assert_eq!(point.fields[0].offset, 0);
        assert_eq!(point.fields[1].offset, 8);
        assert_eq!(point.instance_size, 16);
    }

    #[test]
    fn subclass_fields_follow_parent_fields() {
        let mut table = ClassTable::new();
        table
            .register(
                "Animal",
                None,
                vec![("name".to_string(), Ty::String, false)],
                vec![],
                None,
            )
            .unwrap();
        table
            .register(
                "Dog",
                Some("Animal"),
                vec![("breed".to_string(), Ty::String, false)],
                vec![],
                None,
            )
            .unwrap();
        let dog = table.get("Dog").unwrap();
        assert_eq!(dog.fields.len(), 2);
        assert_eq!(dog.fields[0].name, "name");
        assert_eq!(dog.fields[1].offset, 8);
        assert!(table.is_subclass("Dog", "Animal"));
        assert!(!table.is_subclass("Animal", "Dog"));
    }

    #[test]
    fn registering_with_unknown_parent_fails() {
        let mut table = ClassTable::new();
        let err = table
            .register("Dog", Some("Animal"), vec![], vec![], None)
            .unwrap_err();
        assert!(matches!(err, ClassError::UnknownParent(_)));
    }

    #[test]
    fn overriding_method_replaces_inherited_slot() {
        let mut table = ClassTable::new();
        table
            .register(
                "Animal",
                None,
                vec![],
                vec![MethodSlot {
                    name: "speak".to_string(),
                    param_tys: vec![],
                    ret_ty: Ty::String,
                    function_id: Some(1),
                    is_static: false,
                }],
                None,
            )
            .unwrap();
        table
            .register(
                "Dog",
                Some("Animal"),
                vec![],
                vec![MethodSlot {
                    name: "speak".to_string(),
                    param_tys: vec![],
                    ret_ty: Ty::String,
                    function_id: Some(2),
                    is_static: false,
                }],
                None,
            )
            .unwrap();
        let dog = table.get("Dog").unwrap();
        assert_eq!(dog.methods.len(), 1);
        assert_eq!(dog.method("speak").unwrap().function_id, Some(2));
    }
}
