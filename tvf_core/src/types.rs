//! Type descriptors: the shape of a value, independent of any instance.
//!
//! Descriptors are immutable and cheap to clone (children sit behind `Arc`).
//! Equality is structural, so two descriptors built separately with the same
//! shape compare equal. Struct field order is part of the shape and fixes the
//! wire layout of every value encoded against it.

use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, TvfError};
use crate::format;
use crate::value::{Payload, Value};

/// Deepest descriptor nesting accepted from text or from the wire.
pub const MAX_NESTING: usize = 64;

/// Fixed set of scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// UTF-8 text, length-prefixed on the wire.
    String,
    /// Opaque bytes, length-prefixed on the wire.
    Binary,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 13] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Int8,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt8,
        PrimitiveKind::UInt16,
        PrimitiveKind::UInt32,
        PrimitiveKind::UInt64,
        PrimitiveKind::Float32,
        PrimitiveKind::Float64,
        PrimitiveKind::String,
        PrimitiveKind::Binary,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::Int8 => "Int8",
            PrimitiveKind::Int16 => "Int16",
            PrimitiveKind::Int32 => "Int32",
            PrimitiveKind::Int64 => "Int64",
            PrimitiveKind::UInt8 => "UInt8",
            PrimitiveKind::UInt16 => "UInt16",
            PrimitiveKind::UInt32 => "UInt32",
            PrimitiveKind::UInt64 => "UInt64",
            PrimitiveKind::Float32 => "Float32",
            PrimitiveKind::Float64 => "Float64",
            PrimitiveKind::String => "String",
            PrimitiveKind::Binary => "Binary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Payload width in bytes, `None` for length-prefixed kinds.
    pub fn width(self) -> Option<usize> {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::Int8 | PrimitiveKind::UInt8 => Some(1),
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => Some(2),
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Float32 => Some(4),
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Float64 => Some(8),
            PrimitiveKind::String | PrimitiveKind::Binary => None,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named member of a struct descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    name: String,
    ty: TypeDescriptor,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.ty
    }
}

/// Ordered, duplicate-free field list of a struct descriptor.
///
/// Only constructible through [`TypeDescriptor::struct_of`] (or the wire and
/// text decoders, which go through the same checks).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    fields: Arc<[Field]>,
}

impl StructType {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Shape of a value: a primitive, an array of one element type, or a struct
/// with ordered named fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Array(Arc<TypeDescriptor>),
    Struct(StructType),
}

impl TypeDescriptor {
    pub const BOOLEAN: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Boolean);
    pub const INT8: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Int8);
    pub const INT16: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Int16);
    pub const INT32: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Int32);
    pub const INT64: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Int64);
    pub const UINT8: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::UInt8);
    pub const UINT16: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::UInt16);
    pub const UINT32: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::UInt32);
    pub const UINT64: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::UInt64);
    pub const FLOAT32: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Float32);
    pub const FLOAT64: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Float64);
    pub const STRING: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::String);
    pub const BINARY: TypeDescriptor = TypeDescriptor::Primitive(PrimitiveKind::Binary);

    pub fn primitive(kind: PrimitiveKind) -> Self {
        TypeDescriptor::Primitive(kind)
    }

    pub fn array_of(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Arc::new(element))
    }

    /// Build a struct descriptor. Field order is kept as given; names must be
    /// unique.
    pub fn struct_of<N, I>(fields: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, TypeDescriptor)>,
    {
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|(name, ty)| Field::new(name, ty))
            .collect();
        Self::from_fields(fields)
    }

    pub(crate) fn from_fields(fields: Vec<Field>) -> Result<Self> {
        if u32::try_from(fields.len()).is_err() {
            return Err(TvfError::codec(0, "struct has more than u32::MAX fields"));
        }
        for (i, field) in fields.iter().enumerate() {
            if u32::try_from(field.name.len()).is_err() {
                return Err(TvfError::codec(0, "field name longer than u32::MAX bytes"));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(TvfError::DuplicateField(field.name.clone()));
            }
        }
        Ok(TypeDescriptor::Struct(StructType {
            fields: fields.into(),
        }))
    }

    /// Structural equality; same as `==`.
    pub fn equals(&self, other: &TypeDescriptor) -> bool {
        self == other
    }

    /// Fixed payload width in bytes for fixed-width primitives (not counting
    /// the presence byte); `None` for strings, binary, arrays and structs.
    pub fn size_hint(&self) -> Option<usize> {
        match self {
            TypeDescriptor::Primitive(kind) => kind.width(),
            TypeDescriptor::Array(_) | TypeDescriptor::Struct(_) => None,
        }
    }

    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self {
            TypeDescriptor::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&TypeDescriptor> {
        match self {
            TypeDescriptor::Array(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            TypeDescriptor::Struct(st) => Some(st),
            _ => None,
        }
    }

    /// Nesting depth; primitives are depth 1.
    pub fn depth(&self) -> usize {
        match self {
            TypeDescriptor::Primitive(_) => 1,
            TypeDescriptor::Array(elem) => 1 + elem.depth(),
            TypeDescriptor::Struct(st) => {
                1 + st.fields().iter().map(|f| f.ty.depth()).max().unwrap_or(0)
            }
        }
    }

    /// xxh3-64 of the wire encoding. Covers field names and field order, so
    /// it tells apart descriptors whose values would encode identically.
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(&format::encode_descriptor(self))
    }

    /// Check that `value` conforms to this descriptor, all the way down.
    pub fn validate(&self, value: &Value) -> Result<()> {
        check(self, value, "$")
    }
}

fn check(ty: &TypeDescriptor, value: &Value, path: &str) -> Result<()> {
    let payload = match value.payload() {
        None => {
            return if value.descriptor() == ty {
                Ok(())
            } else {
                Err(TvfError::mismatch(path, ty, value.descriptor()))
            };
        }
        Some(p) => p,
    };

    match (ty, payload) {
        (TypeDescriptor::Primitive(kind), Payload::Scalar(s)) if s.kind() == *kind => Ok(()),
        (TypeDescriptor::Array(elem), Payload::Elements(items)) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if item.is_missing() {
                    return Err(TvfError::mismatch(item_path, elem, "missing"));
                }
                check(elem, item, &item_path)?;
            }
            Ok(())
        }
        (TypeDescriptor::Struct(st), Payload::Fields(values)) => {
            if st.len() != values.len() {
                return Err(TvfError::mismatch(
                    path,
                    format!("{} fields", st.len()),
                    format!("{} fields", values.len()),
                ));
            }
            for (field, v) in st.fields().iter().zip(values.iter()) {
                check(&field.ty, v, &format!("{path}.{}", field.name))?;
            }
            Ok(())
        }
        _ => Err(TvfError::mismatch(path, ty, value.descriptor())),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(kind) => write!(f, "{kind}"),
            TypeDescriptor::Array(elem) => write!(f, "Array[{elem}]"),
            TypeDescriptor::Struct(st) => {
                f.write_str("Struct{")?;
                for (i, field) in st.fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_identifier(&field.name) {
                        write!(f, "{}: {}", field.name, field.ty)?;
                    } else {
                        write!(f, "`{}`: {}", field.name.replace('`', "``"), field.ty)?;
                    }
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TypeDescriptor {
        TypeDescriptor::struct_of([
            ("a", TypeDescriptor::INT32),
            ("b", TypeDescriptor::array_of(TypeDescriptor::FLOAT64)),
        ])
        .unwrap()
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(sample(), sample());
        assert!(sample().equals(&sample()));

        let reordered = TypeDescriptor::struct_of([
            ("b", TypeDescriptor::array_of(TypeDescriptor::FLOAT64)),
            ("a", TypeDescriptor::INT32),
        ])
        .unwrap();
        assert_ne!(sample(), reordered);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = TypeDescriptor::struct_of([
            ("x", TypeDescriptor::INT32),
            ("x", TypeDescriptor::INT64),
        ])
        .unwrap_err();
        assert!(matches!(err, TvfError::DuplicateField(name) if name == "x"));
    }

    #[test]
    fn test_size_hint() {
        assert_eq!(TypeDescriptor::BOOLEAN.size_hint(), Some(1));
        assert_eq!(TypeDescriptor::UINT16.size_hint(), Some(2));
        assert_eq!(TypeDescriptor::FLOAT32.size_hint(), Some(4));
        assert_eq!(TypeDescriptor::INT64.size_hint(), Some(8));
        assert_eq!(TypeDescriptor::STRING.size_hint(), None);
        assert_eq!(TypeDescriptor::BINARY.size_hint(), None);
        assert_eq!(TypeDescriptor::array_of(TypeDescriptor::INT8).size_hint(), None);
        assert_eq!(sample().size_hint(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(sample().to_string(), "Struct{a: Int32, b: Array[Float64]}");
        let odd = TypeDescriptor::struct_of([("has space", TypeDescriptor::BOOLEAN)]).unwrap();
        assert_eq!(odd.to_string(), "Struct{`has space`: Boolean}");
    }

    #[test]
    fn test_depth() {
        assert_eq!(TypeDescriptor::INT32.depth(), 1);
        assert_eq!(sample().depth(), 3);
        let empty = TypeDescriptor::struct_of(Vec::<(String, TypeDescriptor)>::new()).unwrap();
        assert_eq!(empty.depth(), 1);
    }

    #[test]
    fn test_fingerprint_sees_field_order_and_names() {
        let swapped = TypeDescriptor::struct_of([
            ("y", TypeDescriptor::INT32),
            ("x", TypeDescriptor::INT32),
        ])
        .unwrap();
        let straight = TypeDescriptor::struct_of([
            ("x", TypeDescriptor::INT32),
            ("y", TypeDescriptor::INT32),
        ])
        .unwrap();
        assert_eq!(straight.fingerprint(), straight.clone().fingerprint());
        assert_ne!(straight.fingerprint(), swapped.fingerprint());
    }

    #[test]
    fn test_validate_reports_nested_path() {
        let ty = sample();
        let good = Value::record(
            &ty,
            [
                ("a", Value::from(7i32)),
                ("b", Value::array_from(&TypeDescriptor::FLOAT64, [1.5f64, 2.0]).unwrap()),
            ],
        )
        .unwrap();
        ty.validate(&good).unwrap();

        let other = TypeDescriptor::struct_of([
            ("a", TypeDescriptor::INT32),
            ("b", TypeDescriptor::array_of(TypeDescriptor::FLOAT32)),
        ])
        .unwrap();
        let err = other.validate(&good).unwrap_err();
        match err {
            TvfError::TypeMismatch { path, expected, found } => {
                assert_eq!(path, "$.b[0]");
                assert_eq!(expected, "Float32");
                assert_eq!(found, "Float64");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_validate_missing() {
        let ty = sample();
        ty.validate(&Value::missing(&ty)).unwrap();
        assert!(TypeDescriptor::INT32.validate(&Value::missing(&ty)).is_err());
    }
}
