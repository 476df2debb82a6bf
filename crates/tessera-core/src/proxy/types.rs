//! Native type descriptors
//!
//! A [`NativeType`] describes how a value is laid out in native memory.
//! Struct descriptors are computed from an ordered field list with C layout
//! rules and cached by name in a [`TypeRegistry`], so every use of a name
//! within one compilation sees the same descriptor instance.

use super::function::Signature;
use crate::types::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Native memory representation of a value
#[derive(Debug, Clone)]
pub enum NativeType {
    /// No value
    Void,
    /// `bool`
    Bool,
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// `f64`
    Double,
    /// A runtime [`Value`]
    SqlValue,
    /// Pointer to another type
    Pointer(Box<NativeType>),
    /// Fixed-length array
    Array(Box<NativeType>, usize),
    /// Aggregate or opaque struct
    Struct(Arc<TypeDescriptor>),
    /// Function pointer
    Function(Arc<Signature>),
}

impl NativeType {
    /// Size in bytes
    pub fn size(&self) -> usize {
        match self {
            NativeType::Void => 0,
            NativeType::Bool | NativeType::Int8 => 1,
            NativeType::Int16 => 2,
            NativeType::Int32 | NativeType::UInt32 => 4,
            NativeType::Int64 | NativeType::UInt64 | NativeType::Double => 8,
            NativeType::SqlValue => std::mem::size_of::<Value>(),
            NativeType::Pointer(_) | NativeType::Function(_) => std::mem::size_of::<usize>(),
            NativeType::Array(elem, len) => elem.size() * len,
            NativeType::Struct(desc) => desc.size(),
        }
    }

    /// Alignment in bytes
    pub fn align(&self) -> usize {
        match self {
            NativeType::Void => 1,
            NativeType::SqlValue => std::mem::align_of::<Value>(),
            NativeType::Pointer(_) | NativeType::Function(_) => std::mem::align_of::<usize>(),
            NativeType::Array(elem, _) => elem.align(),
            NativeType::Struct(desc) => desc.align(),
            // primitives are self-aligned
            other => other.size(),
        }
    }

    /// Pointer to this type
    pub fn pointer_to(self) -> NativeType {
        NativeType::Pointer(Box::new(self))
    }

    /// Array of `len` elements of this type
    pub fn array_of(self, len: usize) -> NativeType {
        NativeType::Array(Box::new(self), len)
    }

    /// Struct descriptor, following pointers
    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            NativeType::Struct(desc) => Some(desc),
            NativeType::Pointer(inner) => inner.descriptor(),
            _ => None,
        }
    }
}

impl PartialEq for NativeType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NativeType::Pointer(a), NativeType::Pointer(b)) => a == b,
            (NativeType::Array(a, n), NativeType::Array(b, m)) => n == m && a == b,
            (NativeType::Struct(a), NativeType::Struct(b)) => Arc::ptr_eq(a, b) || a.name == b.name,
            (NativeType::Function(a), NativeType::Function(b)) => a == b,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Void => f.write_str("void"),
            NativeType::Bool => f.write_str("bool"),
            NativeType::Int8 => f.write_str("i8"),
            NativeType::Int16 => f.write_str("i16"),
            NativeType::Int32 => f.write_str("i32"),
            NativeType::Int64 => f.write_str("i64"),
            NativeType::UInt32 => f.write_str("u32"),
            NativeType::UInt64 => f.write_str("u64"),
            NativeType::Double => f.write_str("f64"),
            NativeType::SqlValue => f.write_str("value"),
            NativeType::Pointer(inner) => write!(f, "*{inner}"),
            NativeType::Array(elem, len) => write!(f, "[{elem}; {len}]"),
            NativeType::Struct(desc) => f.write_str(desc.name()),
            NativeType::Function(sig) => write!(f, "fn{sig}"),
        }
    }
}

/// A field inside an aggregate descriptor
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: NativeType,
    /// Byte offset from the start of the struct
    pub offset: usize,
}

/// Whether a struct is decomposed into fields
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Fields the generator may address individually
    Aggregate(Vec<FieldDescriptor>),
    /// Inert blob passed only by pointer
    Opaque,
}

/// Layout of a named native struct
#[derive(Debug)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    size: usize,
    align: usize,
}

impl TypeDescriptor {
    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size including trailing padding
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment
    pub fn align(&self) -> usize {
        self.align
    }

    /// Aggregate or opaque
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Whether the generator may address fields
    pub fn is_opaque(&self) -> bool {
        matches!(self.kind, TypeKind::Opaque)
    }

    /// Fields of an aggregate (empty for opaque types)
    pub fn fields(&self) -> &[FieldDescriptor] {
        match &self.kind {
            TypeKind::Aggregate(fields) => fields,
            TypeKind::Opaque => &[],
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.fields().iter().enumerate().find(|(_, f)| f.name == name)
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

/// Ordered field list from which a struct descriptor is built
///
/// `proxy_struct!` feeds the same list to both this builder and the native
/// `#[repr(C)]` definition, so the two layouts cannot drift apart.
#[derive(Debug, Clone)]
pub struct StructSchema {
    name: String,
    fields: Vec<(String, NativeType)>,
}

impl StructSchema {
    /// Start an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field
    pub fn field(mut self, name: impl Into<String>, ty: NativeType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    /// Append a field in place
    pub fn push_field(&mut self, name: impl Into<String>, ty: NativeType) -> usize {
        self.fields.push((name.into(), ty));
        self.fields.len() - 1
    }

    /// Number of fields declared so far
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// No fields declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compute the C layout
    pub fn build(self) -> TypeDescriptor {
        let mut offset = 0;
        let mut align = 1;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, ty) in self.fields {
            let field_align = ty.align();
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            let size = ty.size();
            fields.push(FieldDescriptor { name, ty, offset });
            offset += size;
        }
        TypeDescriptor {
            name: self.name,
            kind: TypeKind::Aggregate(fields),
            size: align_up(offset, align),
            align,
        }
    }
}

/// Compile-time view of an opaque native type: a byte blob of exactly
/// `size_of::<T>()` bytes with no addressable fields
pub struct Opaque<T>(PhantomData<fn() -> T>);

impl<T: 'static> Opaque<T> {
    /// Descriptor of the capsule
    pub fn describe(name: &str) -> TypeDescriptor {
        TypeDescriptor {
            name: name.to_string(),
            kind: TypeKind::Opaque,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }

    /// Blob type the capsule stands for
    pub fn blob_type() -> NativeType {
        NativeType::Int8.array_of(std::mem::size_of::<T>())
    }
}

/// Per-compilation cache of named struct descriptors
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously registered descriptor
    pub fn lookup(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).cloned()
    }

    /// Registered descriptor for `name`, building it on first use
    pub fn struct_type(
        &mut self,
        name: &str,
        build: impl FnOnce(&mut Self) -> StructSchema,
    ) -> NativeType {
        if let Some(existing) = self.types.get(name) {
            return NativeType::Struct(existing.clone());
        }
        let descriptor = Arc::new(build(self).build());
        let descriptor = self
            .types
            .entry(name.to_string())
            .or_insert(descriptor)
            .clone();
        NativeType::Struct(descriptor)
    }

    /// Registered opaque capsule for `T`
    pub fn opaque_type<T: 'static>(&mut self, name: &str) -> NativeType {
        let descriptor = self
            .types
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Opaque::<T>::describe(name)))
            .clone();
        NativeType::Struct(descriptor)
    }

    /// Register an already-built descriptor (first registration wins)
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        self.types
            .entry(descriptor.name.clone())
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// No types registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A Rust type with a native descriptor
pub trait ProxyType: 'static {
    /// Descriptor of the type
    fn native_type(types: &mut TypeRegistry) -> NativeType;
}

macro_rules! primitive_proxy {
    ($($ty:ty => $native:expr),* $(,)?) => {
        $(
            impl ProxyType for $ty {
                fn native_type(_types: &mut TypeRegistry) -> NativeType {
                    $native
                }
            }
        )*
    };
}

primitive_proxy! {
    bool => NativeType::Bool,
    i8 => NativeType::Int8,
    i16 => NativeType::Int16,
    i32 => NativeType::Int32,
    i64 => NativeType::Int64,
    u32 => NativeType::UInt32,
    u64 => NativeType::UInt64,
    f64 => NativeType::Double,
    Value => NativeType::SqlValue,
}

impl<T: ProxyType> ProxyType for Arc<T> {
    fn native_type(types: &mut TypeRegistry) -> NativeType {
        T::native_type(types).pointer_to()
    }
}

impl<T: ProxyType> ProxyType for Vec<T> {
    fn native_type(types: &mut TypeRegistry) -> NativeType {
        T::native_type(types).pointer_to()
    }
}

impl<T: ProxyType, const N: usize> ProxyType for [T; N] {
    fn native_type(types: &mut TypeRegistry) -> NativeType {
        T::native_type(types).array_of(N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_layout_padding() {
        let desc = StructSchema::new("Padded")
            .field("a", NativeType::Int8)
            .field("b", NativeType::Int64)
            .field("c", NativeType::Int16)
            .build();
        let offsets: Vec<usize> = desc.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(desc.size(), 24);
        assert_eq!(desc.align(), 8);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let mut types = TypeRegistry::new();
        let first = types.struct_type("Pair", |_| {
            StructSchema::new("Pair")
                .field("x", NativeType::Int32)
                .field("y", NativeType::Int32)
        });
        let second = types.struct_type("Pair", |_| StructSchema::new("Pair"));
        let (a, b) = (first.descriptor().unwrap(), second.descriptor().unwrap());
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(b.fields().len(), 2);
        assert_eq!(types.len(), 1);
    }

    #[test]
    fn test_nested_struct_and_arrays() {
        let mut types = TypeRegistry::new();
        let inner = types.struct_type("Inner", |_| {
            StructSchema::new("Inner")
                .field("v", NativeType::Int16)
                .field("w", NativeType::Int8)
        });
        assert_eq!(inner.size(), 4);
        let outer = StructSchema::new("Outer")
            .field("flag", NativeType::Bool)
            .field("inner", inner)
            .field("buf", NativeType::UInt32.array_of(3))
            .build();
        let offsets: Vec<usize> = outer.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 2, 8]);
        assert_eq!(outer.size(), 20);
    }

    #[test]
    fn test_opaque_capsule_has_no_fields() {
        struct Hidden {
            _a: u64,
            _b: [u8; 3],
        }
        let mut types = TypeRegistry::new();
        let ty = types.opaque_type::<Hidden>("Hidden");
        let desc = ty.descriptor().unwrap();
        assert!(desc.is_opaque());
        assert!(desc.fields().is_empty());
        assert_eq!(desc.size(), std::mem::size_of::<Hidden>());
        assert_eq!(Opaque::<Hidden>::blob_type().size(), std::mem::size_of::<Hidden>());
    }
}
