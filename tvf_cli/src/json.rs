//! JSON view of typed values, one JSON document per value.
//!
//! `null` is Missing. Binary is a hex string. Non-finite floats are the
//! strings `"NaN"`, `"inf"` and `"-inf"`. Structs are objects keyed by field
//! name; an absent key reads as Missing.

use anyhow::{anyhow, bail, Context};
use serde_json::{Map, Number, Value as Json};

use tvf_core::{PrimitiveKind, Scalar, TypeDescriptor, Value};

pub fn to_json(value: &Value) -> anyhow::Result<Json> {
    if value.is_missing() {
        return Ok(Json::Null);
    }
    match value.descriptor() {
        TypeDescriptor::Primitive(_) => {
            let scalar = value
                .as_scalar()?
                .ok_or_else(|| anyhow!("present primitive without a scalar"))?;
            Ok(scalar_to_json(scalar))
        }
        TypeDescriptor::Array(_) => {
            let items = value
                .elements()?
                .ok_or_else(|| anyhow!("present array without elements"))?;
            Ok(Json::Array(items.map(to_json).collect::<anyhow::Result<_>>()?))
        }
        TypeDescriptor::Struct(_) => {
            let fields = value
                .fields()?
                .ok_or_else(|| anyhow!("present struct without fields"))?;
            let mut object = Map::new();
            for (field, v) in fields {
                object.insert(field.name().to_string(), to_json(v)?);
            }
            Ok(Json::Object(object))
        }
    }
}

fn scalar_to_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::Boolean(b) => Json::Bool(*b),
        Scalar::Int8(v) => Json::from(*v),
        Scalar::Int16(v) => Json::from(*v),
        Scalar::Int32(v) => Json::from(*v),
        Scalar::Int64(v) => Json::from(*v),
        Scalar::UInt8(v) => Json::from(*v),
        Scalar::UInt16(v) => Json::from(*v),
        Scalar::UInt32(v) => Json::from(*v),
        Scalar::UInt64(v) => Json::from(*v),
        Scalar::Float32(v) => float_to_json(*v as f64),
        Scalar::Float64(v) => float_to_json(*v),
        Scalar::String(s) => Json::String(s.clone()),
        Scalar::Binary(b) => Json::String(hex::encode(b)),
    }
}

fn float_to_json(v: f64) -> Json {
    match Number::from_f64(v) {
        Some(n) => Json::Number(n),
        None if v.is_nan() => Json::String("NaN".into()),
        None if v > 0.0 => Json::String("inf".into()),
        None => Json::String("-inf".into()),
    }
}

/// Build a value of `ty` from its JSON form.
pub fn from_json(ty: &TypeDescriptor, json: &Json) -> anyhow::Result<Value> {
    convert(ty, json, "$")
}

fn convert(ty: &TypeDescriptor, json: &Json, path: &str) -> anyhow::Result<Value> {
    if json.is_null() {
        return Ok(Value::missing(ty));
    }
    match ty {
        TypeDescriptor::Primitive(kind) => {
            let scalar = json_to_scalar(*kind, json).with_context(|| format!("at {path}"))?;
            Ok(Value::scalar(scalar))
        }
        TypeDescriptor::Array(elem) => {
            let items = json
                .as_array()
                .ok_or_else(|| anyhow!("at {path}: expected a JSON array for {ty}"))?;
            let values = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    if item.is_null() {
                        bail!("at {item_path}: array elements cannot be null");
                    }
                    convert(elem, item, &item_path)
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Value::array(ty, values)?)
        }
        TypeDescriptor::Struct(st) => {
            let object = json
                .as_object()
                .ok_or_else(|| anyhow!("at {path}: expected a JSON object for {ty}"))?;
            if let Some(unknown) = object.keys().find(|k| st.field(k).is_none()) {
                bail!("at {path}: no field `{unknown}` in {ty}");
            }
            let values = st
                .fields()
                .iter()
                .map(|field| {
                    let field_path = format!("{path}.{}", field.name());
                    match object.get(field.name()) {
                        Some(v) => convert(field.descriptor(), v, &field_path),
                        None => Ok(Value::missing(field.descriptor())),
                    }
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Value::structure(ty, values)?)
        }
    }
}

fn json_to_scalar(kind: PrimitiveKind, json: &Json) -> anyhow::Result<Scalar> {
    let expected = || anyhow!("expected {kind}, found {json}");
    Ok(match kind {
        PrimitiveKind::Boolean => Scalar::Boolean(json.as_bool().ok_or_else(expected)?),
        PrimitiveKind::Int8 => Scalar::Int8(int(json)?.try_into()?),
        PrimitiveKind::Int16 => Scalar::Int16(int(json)?.try_into()?),
        PrimitiveKind::Int32 => Scalar::Int32(int(json)?.try_into()?),
        PrimitiveKind::Int64 => Scalar::Int64(int(json)?),
        PrimitiveKind::UInt8 => Scalar::UInt8(uint(json)?.try_into()?),
        PrimitiveKind::UInt16 => Scalar::UInt16(uint(json)?.try_into()?),
        PrimitiveKind::UInt32 => Scalar::UInt32(uint(json)?.try_into()?),
        PrimitiveKind::UInt64 => Scalar::UInt64(uint(json)?),
        PrimitiveKind::Float32 => Scalar::Float32(float(json)? as f32),
        PrimitiveKind::Float64 => Scalar::Float64(float(json)?),
        PrimitiveKind::String => Scalar::String(json.as_str().ok_or_else(expected)?.to_string()),
        PrimitiveKind::Binary => {
            let text = json.as_str().ok_or_else(expected)?;
            Scalar::Binary(hex::decode(text).context("binary values are hex strings")?)
        }
    })
}

fn int(json: &Json) -> anyhow::Result<i64> {
    json.as_i64()
        .ok_or_else(|| anyhow!("expected a signed integer, found {json}"))
}

fn uint(json: &Json) -> anyhow::Result<u64> {
    json.as_u64()
        .ok_or_else(|| anyhow!("expected an unsigned integer, found {json}"))
}

fn float(json: &Json) -> anyhow::Result<f64> {
    match json {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow!("number {n} is not representable as f64")),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => bail!("expected a number, \"NaN\", \"inf\" or \"-inf\", found \"{other}\""),
        },
        other => bail!("expected a number, found {other}"),
    }
}
