//! The closed type lattice used by the type inferencer and code generator.

mod cast;
pub mod infer;
pub mod symbol;

pub use cast::cast_up;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
    Function,
    Class(String),
    Promise(Box<Ty>),
    Any,
}

impl Ty {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64 | Ty::U8 | Ty::U16 | Ty::U32 | Ty::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64)
    }

    /// Width in bits; `Any`/`Void`/`String`/aggregate types return 0.
    pub fn width(&self) -> u32 {
        match self {
            Ty::I8 | Ty::U8 => 8,
            Ty::I16 | Ty::U16 => 16,
            Ty::I32 | Ty::U32 | Ty::F32 => 32,
            Ty::I64 | Ty::U64 | Ty::F64 => 64,
            _ => 0,
        }
    }

    /// Size in bytes of one stack slot / scalar value for this type.
    /// All locals occupy 8-byte slots per spec.md §4.3 regardless of
    /// their logical width, so this is informational, not allocation size.
    pub fn scalar_size(&self) -> usize {
        match self {
            Ty::Void => 0,
            _ => 8,
        }
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::I8 => write!(f, "int8"),
            Ty::I16 => write!(f, "int16"),
            Ty::I32 => write!(f, "int32"),
            Ty::I64 => write!(f, "int64"),
            Ty::U8 => write!(f, "uint8"),
            Ty::U16 => write!(f, "uint16"),
            Ty::U32 => write!(f, "uint32"),
            Ty::U64 => write!(f, "uint64"),
            Ty::F32 => write!(f, "float32"),
            Ty::F64 => write!(f, "float64"),
            Ty::Bool => write!(f, "boolean"),
            Ty::String => write!(f, "string"),
            Ty::Function => write!(f, "function"),
            Ty::Class(name) => write!(f, "{name}"),
            Ty::Promise(inner) => write!(f, "Promise<{inner}>"),
            Ty::Any => write!(f, "any"),
        }
    }
}

/// Parses a declared type annotation's textual name into a `Ty`.
/// Unknown names are assumed to be class references.
pub fn named_type(name: &str) -> Ty {
    match name {
        "void" => Ty::Void,
        "int8" => Ty::I8,
        "int16" => Ty::I16,
        "int32" => Ty::I32,
        "int64" | "int" => Ty::I64,
        "uint8" => Ty::U8,
        "uint16" => Ty::U16,
        "uint32" => Ty::U32,
        "uint64" => Ty::U64,
        "float32" => Ty::F32,
        "float64" | "float" | "number" => Ty::F64,
        "boolean" | "bool" => Ty::Bool,
        "string" => Ty::String,
        "any" => Ty::Any,
        other => Ty::Class(other.to_string()),
    }
}
