//! Value containers: typed instances of data, or explicit absence.
//!
//! A [`Value`] always carries the descriptor it conforms to. Constructors check
//! conformance up front, so any `Value` that exists is valid for its own
//! descriptor. Values are immutable; `with_field` / `with_element` return a
//! modified copy and share untouched children.

use std::slice;
use std::sync::Arc;

use crate::error::{Result, TvfError};
use crate::types::{Field, PrimitiveKind, TypeDescriptor};

/// A present primitive payload.
///
/// Floats compare by bit pattern, so `NaN == NaN` and `0.0 != -0.0`. This is
/// what makes encode/decode an exact round trip.
#[derive(Debug, Clone)]
pub enum Scalar {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Scalar {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Scalar::Boolean(_) => PrimitiveKind::Boolean,
            Scalar::Int8(_) => PrimitiveKind::Int8,
            Scalar::Int16(_) => PrimitiveKind::Int16,
            Scalar::Int32(_) => PrimitiveKind::Int32,
            Scalar::Int64(_) => PrimitiveKind::Int64,
            Scalar::UInt8(_) => PrimitiveKind::UInt8,
            Scalar::UInt16(_) => PrimitiveKind::UInt16,
            Scalar::UInt32(_) => PrimitiveKind::UInt32,
            Scalar::UInt64(_) => PrimitiveKind::UInt64,
            Scalar::Float32(_) => PrimitiveKind::Float32,
            Scalar::Float64(_) => PrimitiveKind::Float64,
            Scalar::String(_) => PrimitiveKind::String,
            Scalar::Binary(_) => PrimitiveKind::Binary,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Any signed integer, or an unsigned one that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int8(v) => Some(*v as i64),
            Scalar::Int16(v) => Some(*v as i64),
            Scalar::Int32(v) => Some(*v as i64),
            Scalar::Int64(v) => Some(*v),
            Scalar::UInt8(v) => Some(*v as i64),
            Scalar::UInt16(v) => Some(*v as i64),
            Scalar::UInt32(v) => Some(*v as i64),
            Scalar::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Any unsigned integer, or a non-negative signed one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::UInt8(v) => Some(*v as u64),
            Scalar::UInt16(v) => Some(*v as u64),
            Scalar::UInt32(v) => Some(*v as u64),
            Scalar::UInt64(v) => Some(*v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float32(v) => Some(*v as f64),
            Scalar::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Scalar::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            (Scalar::Int8(a), Scalar::Int8(b)) => a == b,
            (Scalar::Int16(a), Scalar::Int16(b)) => a == b,
            (Scalar::Int32(a), Scalar::Int32(b)) => a == b,
            (Scalar::Int64(a), Scalar::Int64(b)) => a == b,
            (Scalar::UInt8(a), Scalar::UInt8(b)) => a == b,
            (Scalar::UInt16(a), Scalar::UInt16(b)) => a == b,
            (Scalar::UInt32(a), Scalar::UInt32(b)) => a == b,
            (Scalar::UInt64(a), Scalar::UInt64(b)) => a == b,
            (Scalar::Float32(a), Scalar::Float32(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Float64(a), Scalar::Float64(b)) => a.to_bits() == b.to_bits(),
            (Scalar::String(a), Scalar::String(b)) => a == b,
            (Scalar::Binary(a), Scalar::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Payload {
    Scalar(Scalar),
    Elements(Arc<[Value]>),
    Fields(Arc<[Value]>),
}

/// A value conforming to exactly one [`TypeDescriptor`].
///
/// Missing is a state of its own: a missing array and a present empty array
/// are different values and encode differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    ty: TypeDescriptor,
    payload: Option<Payload>,
}

impl Value {
    pub fn missing(ty: &TypeDescriptor) -> Self {
        Self {
            ty: ty.clone(),
            payload: None,
        }
    }

    /// Present primitive whose descriptor is inferred from the scalar.
    pub fn scalar(scalar: Scalar) -> Self {
        Self {
            ty: TypeDescriptor::Primitive(scalar.kind()),
            payload: Some(Payload::Scalar(scalar)),
        }
    }

    /// Present primitive checked against an expected descriptor.
    pub fn from_scalar(ty: &TypeDescriptor, scalar: Scalar) -> Result<Self> {
        match ty {
            TypeDescriptor::Primitive(kind) if *kind == scalar.kind() => Ok(Self::scalar(scalar)),
            _ => Err(TvfError::mismatch("$", ty, scalar.kind())),
        }
    }

    /// Present array. `ty` is the array descriptor; every element must carry
    /// its element type and be present. Elements have no presence byte on the
    /// wire, so per-element absence needs a struct element type.
    pub fn array(ty: &TypeDescriptor, elements: Vec<Value>) -> Result<Self> {
        let elem_ty = ty
            .element_type()
            .ok_or_else(|| TvfError::mismatch("$", ty, "Array"))?;
        for (i, e) in elements.iter().enumerate() {
            if e.ty != *elem_ty {
                return Err(TvfError::mismatch(format!("$[{i}]"), elem_ty, &e.ty));
            }
            if e.is_missing() {
                return Err(TvfError::mismatch(format!("$[{i}]"), elem_ty, "missing"));
            }
        }
        Ok(Self {
            ty: ty.clone(),
            payload: Some(Payload::Elements(elements.into())),
        })
    }

    /// Present array of `element_ty` built from anything convertible to a value.
    pub fn array_from<T, I>(element_ty: &TypeDescriptor, items: I) -> Result<Self>
    where
        T: Into<Value>,
        I: IntoIterator<Item = T>,
    {
        let elements = items.into_iter().map(Into::into).collect();
        Self::array(&TypeDescriptor::array_of(element_ty.clone()), elements)
    }

    /// Present struct from field values in declared order.
    pub fn structure(ty: &TypeDescriptor, fields: Vec<Value>) -> Result<Self> {
        let st = ty
            .as_struct()
            .ok_or_else(|| TvfError::mismatch("$", ty, "Struct"))?;
        if st.len() != fields.len() {
            return Err(TvfError::mismatch(
                "$",
                format!("{} fields", st.len()),
                format!("{} fields", fields.len()),
            ));
        }
        for (field, v) in st.fields().iter().zip(fields.iter()) {
            if v.ty != *field.descriptor() {
                return Err(TvfError::mismatch(
                    format!("$.{}", field.name()),
                    field.descriptor(),
                    &v.ty,
                ));
            }
        }
        Ok(Self {
            ty: ty.clone(),
            payload: Some(Payload::Fields(fields.into())),
        })
    }

    /// Present struct from `(name, value)` pairs in any order. Every declared
    /// field must be supplied exactly once.
    pub fn record<N, I>(ty: &TypeDescriptor, pairs: I) -> Result<Self>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        let st = ty
            .as_struct()
            .ok_or_else(|| TvfError::mismatch("$", ty, "Struct"))?;
        let mut slots: Vec<Option<Value>> = vec![None; st.len()];
        for (name, value) in pairs {
            let name = name.as_ref();
            let idx = st.field_index(name).ok_or_else(|| TvfError::NoSuchField {
                name: name.to_string(),
                descriptor: ty.to_string(),
            })?;
            if slots[idx].replace(value).is_some() {
                return Err(TvfError::DuplicateField(name.to_string()));
            }
        }
        let fields = st
            .fields()
            .iter()
            .zip(slots)
            .map(|(field, slot)| {
                slot.ok_or_else(|| {
                    TvfError::mismatch(format!("$.{}", field.name()), field.descriptor(), "no value")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::structure(ty, fields)
    }

    pub(crate) fn from_parts(ty: TypeDescriptor, payload: Option<Payload>) -> Self {
        Self { ty, payload }
    }

    pub(crate) fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn is_missing(&self) -> bool {
        self.payload.is_none()
    }

    pub fn is_present(&self) -> bool {
        self.payload.is_some()
    }

    /// `Ok(None)` when missing; `TypeMismatch` when not a primitive.
    pub fn as_scalar(&self) -> Result<Option<&Scalar>> {
        match (&self.ty, &self.payload) {
            (TypeDescriptor::Primitive(_), None) => Ok(None),
            (TypeDescriptor::Primitive(_), Some(Payload::Scalar(s))) => Ok(Some(s)),
            _ => Err(TvfError::mismatch("$", "primitive", &self.ty)),
        }
    }

    /// Element sequence of a present array, `Ok(None)` when missing.
    ///
    /// The iterator is lazy and `Clone`; call again (or clone it) to restart.
    pub fn elements(&self) -> Result<Option<Elements<'_>>> {
        match (&self.ty, &self.payload) {
            (TypeDescriptor::Array(_), None) => Ok(None),
            (TypeDescriptor::Array(_), Some(Payload::Elements(items))) => Ok(Some(Elements {
                inner: items.iter(),
            })),
            _ => Err(TvfError::mismatch("$", "Array", &self.ty)),
        }
    }

    /// Value of the named struct field, `Ok(None)` when the struct is missing.
    pub fn field_value(&self, name: &str) -> Result<Option<&Value>> {
        let st = self
            .ty
            .as_struct()
            .ok_or_else(|| TvfError::mismatch("$", "Struct", &self.ty))?;
        let idx = st.field_index(name).ok_or_else(|| TvfError::NoSuchField {
            name: name.to_string(),
            descriptor: self.ty.to_string(),
        })?;
        match &self.payload {
            Some(Payload::Fields(values)) => Ok(values.get(idx)),
            _ => Ok(None),
        }
    }

    /// Declared fields paired with their values, `Ok(None)` when missing.
    pub fn fields(&self) -> Result<Option<impl Iterator<Item = (&Field, &Value)> + Clone>> {
        let st = self
            .ty
            .as_struct()
            .ok_or_else(|| TvfError::mismatch("$", "Struct", &self.ty))?;
        match &self.payload {
            Some(Payload::Fields(values)) => Ok(Some(st.fields().iter().zip(values.iter()))),
            _ => Ok(None),
        }
    }

    /// Copy of this struct with one field replaced.
    pub fn with_field(&self, name: &str, value: Value) -> Result<Value> {
        let st = self
            .ty
            .as_struct()
            .ok_or_else(|| TvfError::mismatch("$", "Struct", &self.ty))?;
        let idx = st.field_index(name).ok_or_else(|| TvfError::NoSuchField {
            name: name.to_string(),
            descriptor: self.ty.to_string(),
        })?;
        let Some(Payload::Fields(values)) = &self.payload else {
            return Err(TvfError::mismatch("$", "present Struct", "missing"));
        };
        let mut fields = values.to_vec();
        fields[idx] = value;
        Self::structure(&self.ty, fields)
    }

    /// Copy of this array with element `index` replaced.
    pub fn with_element(&self, index: usize, value: Value) -> Result<Value> {
        let Some(Payload::Elements(items)) = &self.payload else {
            return Err(TvfError::mismatch("$", "present Array", &self.ty));
        };
        if index >= items.len() {
            return Err(TvfError::ElementOutOfRange {
                index: index as u64,
                count: items.len() as u64,
            });
        }
        let mut elements = items.to_vec();
        elements[index] = value;
        Self::array(&self.ty, elements)
    }
}

/// Borrowing iterator over an array's element values.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    inner: slice::Iter<'a, Value>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Elements<'_> {}

impl DoubleEndedIterator for Elements<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::scalar(s)
    }
}

macro_rules! impl_from_primitive {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Boolean,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Binary,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::scalar(Scalar::String(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> TypeDescriptor {
        TypeDescriptor::struct_of([
            ("x", TypeDescriptor::INT32),
            ("y", TypeDescriptor::INT32),
            ("label", TypeDescriptor::STRING),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_is_distinct_from_empty() {
        let ty = TypeDescriptor::array_of(TypeDescriptor::INT64);
        let missing = Value::missing(&ty);
        let empty = Value::array(&ty, Vec::new()).unwrap();
        assert!(missing.is_missing());
        assert!(empty.is_present());
        assert_ne!(missing, empty);
        assert!(missing.elements().unwrap().is_none());
        assert_eq!(empty.elements().unwrap().unwrap().count(), 0);
    }

    #[test]
    fn test_from_scalar_rejects_wrong_width() {
        let err = Value::from_scalar(&TypeDescriptor::INT64, Scalar::Int32(1)).unwrap_err();
        assert!(matches!(err, TvfError::TypeMismatch { .. }));
        let ok = Value::from_scalar(&TypeDescriptor::INT64, Scalar::Int64(1)).unwrap();
        assert_eq!(ok.as_scalar().unwrap(), Some(&Scalar::Int64(1)));
    }

    #[test]
    fn test_array_rejects_foreign_element() {
        let ty = TypeDescriptor::array_of(TypeDescriptor::FLOAT64);
        let err = Value::array(&ty, vec![Value::from(1.0f64), Value::from(2i32)]).unwrap_err();
        match err {
            TvfError::TypeMismatch { path, .. } => assert_eq!(path, "$[1]"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_array_rejects_missing_element() {
        let ty = TypeDescriptor::array_of(TypeDescriptor::INT32);
        let err = Value::array(&ty, vec![Value::from(1i32), Value::missing(&TypeDescriptor::INT32)])
            .unwrap_err();
        match err {
            TvfError::TypeMismatch { path, found, .. } => {
                assert_eq!(path, "$[1]");
                assert_eq!(found, "missing");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_structure_checks_field_count() {
        let err = Value::structure(&point(), vec![Value::from(1i32)]).unwrap_err();
        assert!(matches!(err, TvfError::TypeMismatch { .. }));
    }

    #[test]
    fn test_record_any_order_and_field_access() {
        let v = Value::record(
            &point(),
            [
                ("label", Value::from("origin")),
                ("y", Value::from(0i32)),
                ("x", Value::from(0i32)),
            ],
        )
        .unwrap();
        let label = v.field_value("label").unwrap().unwrap();
        assert_eq!(label.as_scalar().unwrap().unwrap().as_str(), Some("origin"));

        let names: Vec<&str> = v.fields().unwrap().unwrap().map(|(f, _)| f.name()).collect();
        assert_eq!(names, ["x", "y", "label"]);
    }

    #[test]
    fn test_record_errors() {
        let err = Value::record(&point(), [("z", Value::from(1i32))]).unwrap_err();
        assert!(matches!(err, TvfError::NoSuchField { .. }));

        let err = Value::record(&point(), [("x", Value::from(1i32))]).unwrap_err();
        match err {
            TvfError::TypeMismatch { path, .. } => assert_eq!(path, "$.y"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_field_value_no_such_field() {
        let v = Value::missing(&point());
        assert!(matches!(
            v.field_value("nope"),
            Err(TvfError::NoSuchField { .. })
        ));
        assert!(v.field_value("x").unwrap().is_none());
    }

    #[test]
    fn test_accessor_on_wrong_variant() {
        let v = Value::from(3u8);
        assert!(v.elements().is_err());
        assert!(v.field_value("x").is_err());
        let arr = Value::array_from(&TypeDescriptor::UINT8, [1u8, 2]).unwrap();
        assert!(arr.as_scalar().is_err());
    }

    #[test]
    fn test_elements_restartable() {
        let arr = Value::array_from(&TypeDescriptor::INT16, [1i16, 2, 3]).unwrap();
        let it = arr.elements().unwrap().unwrap();
        let first: Vec<_> = it.clone().collect();
        let second: Vec<_> = it.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_copy_on_modify() {
        let original = Value::record(
            &point(),
            [
                ("x", Value::from(1i32)),
                ("y", Value::from(2i32)),
                ("label", Value::from("a")),
            ],
        )
        .unwrap();
        let moved = original.with_field("x", Value::from(10i32)).unwrap();
        assert_eq!(
            original.field_value("x").unwrap().unwrap(),
            &Value::from(1i32)
        );
        assert_eq!(moved.field_value("x").unwrap().unwrap(), &Value::from(10i32));
        assert!(original.with_field("x", Value::from(1i64)).is_err());

        let arr = Value::array_from(&TypeDescriptor::STRING, ["a", "b"]).unwrap();
        let arr2 = arr.with_element(1, Value::from("c")).unwrap();
        assert_ne!(arr, arr2);
        assert!(matches!(
            arr.with_element(5, Value::from("x")),
            Err(TvfError::ElementOutOfRange { .. })
        ));
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0f32), Value::from(-0.0f32));
    }

    #[test]
    fn test_scalar_widening_getters() {
        assert_eq!(Scalar::Int8(-3).as_i64(), Some(-3));
        assert_eq!(Scalar::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Scalar::Int32(-1).as_u64(), None);
        assert_eq!(Scalar::UInt16(9).as_u64(), Some(9));
        assert_eq!(Scalar::Float32(1.5).as_f64(), Some(1.5));
        assert_eq!(Scalar::Binary(vec![1]).as_bytes(), Some(&[1u8][..]));
    }
}
