//! Proxy / type-mirror layer
//!
//! Generated code touches native objects only through descriptions produced
//! here: struct layouts ([`TypeDescriptor`]), call signatures
//! ([`Signature`]) and callable handles ([`FunctionId`]).
//!
//! A native struct that generated code reads field by field is declared with
//! [`proxy_struct!`](crate::proxy_struct). The macro takes one field list and
//! emits both the `#[repr(C)]` Rust definition and the schema the descriptor
//! is built from, so the two layouts cannot drift apart. Types the generator
//! only passes around by pointer are declared with
//! [`proxy_opaque!`](crate::proxy_opaque) and have no field access at all.

mod datum;
mod function;
mod types;

pub use datum::{
    Datum, LocalId, NativeArg, NativeRet, SlotRef, StateId, TaskFunction, Tuple, expect_value,
    truthy,
};
pub use function::{
    CallEnv, FunctionId, FunctionRegistry, MemberFunction, Mut, NativeFunction, ProxyFunction, Ref,
    Signature,
};
pub use types::{
    FieldDescriptor, NativeType, Opaque, ProxyType, StructSchema, TypeDescriptor, TypeKind,
    TypeRegistry,
};

/// A struct whose fields generated code may load individually
///
/// Implemented only by [`proxy_struct!`](crate::proxy_struct); opaque types
/// never implement it.
pub trait ProxyStruct: ProxyType {
    /// Field names in declaration order
    const FIELDS: &'static [&'static str];

    /// Load one field by declaration index
    fn load_field(&self, index: usize) -> crate::error::Result<Datum>;

    /// Declaration index of a field
    fn field_index(name: &str) -> Option<usize> {
        Self::FIELDS.iter().position(|f| *f == name)
    }
}

/// Declare a native struct visible field-by-field to generated code
///
/// ```
/// tessera_core::proxy_struct! {
///     /// Key range handed to one scan task
///     pub struct KeyRange as "KeyRange" {
///         pub low: u32,
///         pub high: u32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! proxy_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident as $symbol:literal {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $fty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )*
        }

        impl $crate::proxy::ProxyType for $name {
            fn native_type(types: &mut $crate::proxy::TypeRegistry) -> $crate::proxy::NativeType {
                types.struct_type($symbol, |types| {
                    let mut schema = $crate::proxy::StructSchema::new($symbol);
                    $(
                        schema.push_field(
                            stringify!($field),
                            <$fty as $crate::proxy::ProxyType>::native_type(types),
                        );
                    )*
                    schema
                })
            }
        }

        impl $crate::proxy::ProxyStruct for $name {
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            fn load_field(&self, index: usize) -> $crate::error::Result<$crate::proxy::Datum> {
                let name = Self::FIELDS.get(index).copied().ok_or_else(|| {
                    $crate::error::Error::codegen(format!(
                        "{} has no field #{}",
                        $symbol, index
                    ))
                })?;
                $(
                    if name == stringify!($field) {
                        return $crate::proxy::NativeRet::into_datum(
                            ::core::clone::Clone::clone(&self.$field),
                        );
                    }
                )*
                Err($crate::error::Error::internal(format!("{} field table is inconsistent", $symbol)))
            }
        }
    };
}

/// Declare a native type as an opaque capsule sized to `size_of::<T>()`
#[macro_export]
macro_rules! proxy_opaque {
    ($($ty:ty => $symbol:literal),* $(,)?) => {
        $(
            impl $crate::proxy::ProxyType for $ty {
                fn native_type(types: &mut $crate::proxy::TypeRegistry) -> $crate::proxy::NativeType {
                    types.opaque_type::<$ty>($symbol)
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TaskInfo;
    use std::mem::{offset_of, size_of};

    crate::proxy_struct! {
        struct Mixed as "test::Mixed" {
            flag: bool,
            wide: u64,
            narrow: i32,
            scale: f64,
        }
    }

    #[test]
    fn test_descriptor_matches_native_layout() {
        let mut types = TypeRegistry::new();
        let ty = Mixed::native_type(&mut types);
        let desc = ty.descriptor().unwrap();
        let offsets: Vec<usize> = desc.fields().iter().map(|f| f.offset).collect();
        assert_eq!(
            offsets,
            vec![
                offset_of!(Mixed, flag),
                offset_of!(Mixed, wide),
                offset_of!(Mixed, narrow),
                offset_of!(Mixed, scale),
            ]
        );
        assert_eq!(desc.size(), size_of::<Mixed>());
    }

    #[test]
    fn test_task_info_layout() {
        let mut types = TypeRegistry::new();
        let ty = TaskInfo::native_type(&mut types);
        let desc = ty.descriptor().unwrap();
        assert_eq!(desc.size(), size_of::<TaskInfo>());
        let (_, field) = desc.field("num_tasks").unwrap();
        assert_eq!(field.offset, offset_of!(TaskInfo, num_tasks));
    }

    #[test]
    fn test_load_field_by_index() {
        let value = Mixed {
            flag: true,
            wide: 9,
            narrow: -3,
            scale: 0.5,
        };
        let idx = Mixed::field_index("narrow").unwrap();
        assert!(matches!(value.load_field(idx).unwrap(), Datum::I32(-3)));
        assert!(value.load_field(9).is_err());
    }
}
