//! Property-based tests using proptest
//!
//! Random descriptors, random conforming values, random byte buffers: the
//! round-trip laws have to hold for all of them.

use std::sync::Arc;

use proptest::prelude::*;

use tvf_codecs::{registry, Lz4Codec};
use tvf_core::codec::{decode, encode, encoded_len};
use tvf_core::format::{decode_descriptor, encode_descriptor};
use tvf_core::{
    Algorithm, PrimitiveKind, StreamReader, StreamWriter, TvfError, TypeDescriptor, Value,
    WriterOptions,
};

/// Strategy for descriptors up to four levels deep. Odd field names need
/// backtick quoting in the text syntax.
fn descriptor_strategy() -> impl Strategy<Value = TypeDescriptor> {
    let leaf = prop::sample::select(PrimitiveKind::ALL.to_vec()).prop_map(TypeDescriptor::primitive);
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(TypeDescriptor::array_of),
            prop::collection::vec(inner, 0..4).prop_map(|tys| {
                TypeDescriptor::struct_of(tys.into_iter().enumerate().map(|(i, ty)| {
                    let name = if i % 2 == 0 { format!("f{i}") } else { format!("field {i}") };
                    (name, ty)
                }))
                .unwrap()
            }),
        ]
    })
}

fn scalar_strategy(kind: PrimitiveKind) -> BoxedStrategy<Value> {
    match kind {
        PrimitiveKind::Boolean => any::<bool>().prop_map(Value::from).boxed(),
        PrimitiveKind::Int8 => any::<i8>().prop_map(Value::from).boxed(),
        PrimitiveKind::Int16 => any::<i16>().prop_map(Value::from).boxed(),
        PrimitiveKind::Int32 => any::<i32>().prop_map(Value::from).boxed(),
        PrimitiveKind::Int64 => any::<i64>().prop_map(Value::from).boxed(),
        PrimitiveKind::UInt8 => any::<u8>().prop_map(Value::from).boxed(),
        PrimitiveKind::UInt16 => any::<u16>().prop_map(Value::from).boxed(),
        PrimitiveKind::UInt32 => any::<u32>().prop_map(Value::from).boxed(),
        PrimitiveKind::UInt64 => any::<u64>().prop_map(Value::from).boxed(),
        PrimitiveKind::Float32 => any::<f32>().prop_map(Value::from).boxed(),
        PrimitiveKind::Float64 => any::<f64>().prop_map(Value::from).boxed(),
        PrimitiveKind::String => ".{0,12}".prop_map(Value::from).boxed(),
        PrimitiveKind::Binary => prop::collection::vec(any::<u8>(), 0..16)
            .prop_map(Value::from)
            .boxed(),
    }
}

/// Present values of `ty`. Array elements are always present.
fn present_strategy(ty: TypeDescriptor) -> BoxedStrategy<Value> {
    match &ty {
        TypeDescriptor::Primitive(kind) => scalar_strategy(*kind),
        TypeDescriptor::Array(elem) => {
            let array_ty = ty.clone();
            prop::collection::vec(present_strategy(elem.as_ref().clone()), 0..5)
                .prop_map(move |items| Value::array(&array_ty, items).unwrap())
                .boxed()
        }
        TypeDescriptor::Struct(st) => {
            let fields: Vec<BoxedStrategy<Value>> = st
                .fields()
                .iter()
                .map(|f| value_strategy(f.descriptor().clone()))
                .collect();
            let struct_ty = ty.clone();
            fields
                .prop_map(move |values| Value::structure(&struct_ty, values).unwrap())
                .boxed()
        }
    }
}

/// Present or missing values of `ty`.
fn value_strategy(ty: TypeDescriptor) -> BoxedStrategy<Value> {
    let missing = Value::missing(&ty);
    prop_oneof![
        1 => Just(missing),
        4 => present_strategy(ty),
    ]
    .boxed()
}

fn typed_value() -> impl Strategy<Value = (TypeDescriptor, Value)> {
    descriptor_strategy().prop_flat_map(|ty| (Just(ty.clone()), value_strategy(ty)))
}

fn typed_values() -> impl Strategy<Value = (TypeDescriptor, Vec<Value>)> {
    descriptor_strategy().prop_flat_map(|ty| {
        (
            Just(ty.clone()),
            prop::collection::vec(value_strategy(ty), 0..60),
        )
    })
}

proptest! {
    /// decode(T, encode(V)) == V
    #[test]
    fn value_round_trip((ty, value) in typed_value()) {
        let bytes = encode(&value).unwrap();
        prop_assert_eq!(bytes.len(), encoded_len(&value));
        prop_assert_eq!(decode(&ty, &bytes).unwrap(), value);
    }

    /// Every strict prefix of a valid encoding underruns.
    #[test]
    fn truncation_underruns((ty, value) in typed_value()) {
        let bytes = encode(&value).unwrap();
        for cut in 0..bytes.len() {
            let is_underrun = matches!(
                decode(&ty, &bytes[..cut]),
                Err(TvfError::BufferUnderrun { .. })
            );
            prop_assert!(is_underrun, "prefix of {} bytes", cut);
        }
    }

    /// Display and FromStr agree, and so do the wire encoding and its decoder.
    #[test]
    fn descriptor_round_trip(ty in descriptor_strategy()) {
        let text = ty.to_string();
        let parsed: TypeDescriptor = text.parse().unwrap();
        prop_assert_eq!(&parsed, &ty);
        prop_assert_eq!(decode_descriptor(&encode_descriptor(&ty)).unwrap(), ty.clone());
        prop_assert_eq!(parsed.fingerprint(), ty.fingerprint());
    }

    /// decompress(compress(B)) == B for every algorithm
    #[test]
    fn compression_round_trip(raw in prop::collection::vec(any::<u8>(), 0..4096)) {
        for algorithm in Algorithm::ALL {
            let block = tvf_codecs::compress(&raw, algorithm).unwrap();
            prop_assert_eq!(block.raw_len() as usize, raw.len());
            prop_assert_eq!(tvf_codecs::decompress(&block).unwrap(), raw.clone());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Stream round trip under arbitrary block thresholds.
    #[test]
    fn stream_round_trip(
        (ty, values) in typed_values(),
        max_elements in 1u32..16,
        max_bytes in 1u32..512,
    ) {
        let options = WriterOptions::default()
            .max_block_elements(max_elements)
            .max_block_bytes(max_bytes);
        let mut w = StreamWriter::create(Vec::new(), ty.clone(), Arc::new(Lz4Codec), options).unwrap();
        w.append_all(&values).unwrap();
        let (bytes, summary) = w.finish().unwrap();
        prop_assert_eq!(summary.elements, values.len() as u64);

        let reader = StreamReader::from_bytes(bytes, registry()).unwrap();
        prop_assert_eq!(reader.descriptor(), &ty);
        let mut stitched = Vec::new();
        for i in 0..reader.block_count() {
            let block = reader.read_block(i).unwrap();
            prop_assert!(block.len() as u32 <= max_elements);
            stitched.extend(block);
        }
        prop_assert_eq!(&stitched, &values);

        let all: Vec<Value> = reader.read_all().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(all, values);
    }
}
