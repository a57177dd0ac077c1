//! Document parsing that keeps every scalar's source text.
//!
//! A secret is a byte string, so `1.50`, `1e3` or a 24-digit account number
//! must reach the engine exactly as written. Documents are read twice: the
//! first pass records the shape of every node, the second reads each
//! non-string scalar as text. The YAML deserializer hands out a plain
//! scalar's source when asked for a string; JSON numbers and booleans are
//! captured as raw values.

use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Parse YAML. Non-string scalars become strings holding their source text.
pub(crate) fn parse_yaml(text: &str) -> Result<Value, serde_yaml::Error> {
    let shape: Shape = serde_yaml::from_str(text)?;
    Verbatim {
        shape: &shape,
        syntax: Syntax::Yaml,
    }
    .deserialize(serde_yaml::Deserializer::from_str(text))
}

/// Parse JSON. Numbers and booleans become strings holding their source text.
pub(crate) fn parse_json(text: &str) -> Result<Value, serde_json::Error> {
    let shape: Shape = serde_json::from_str(text)?;
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let value = Verbatim {
        shape: &shape,
        syntax: Syntax::Json,
    }
    .deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Yaml,
    Json,
}

/// Node kinds, with mapping children in document order.
#[derive(Debug, PartialEq)]
enum Shape {
    Mapping(Vec<Shape>),
    Sequence,
    Null,
    Text,
    Scalar,
}

impl<'de> Deserialize<'de> for Shape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ShapeVisitor)
    }
}

struct ShapeVisitor;

impl<'de> Visitor<'de> for ShapeVisitor {
    type Value = Shape;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document node")
    }

    fn visit_bool<E>(self, _: bool) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_i64<E>(self, _: i64) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_u64<E>(self, _: u64) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_i128<E>(self, _: i128) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_u128<E>(self, _: u128) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_f64<E>(self, _: f64) -> Result<Shape, E> {
        Ok(Shape::Scalar)
    }

    fn visit_str<E>(self, _: &str) -> Result<Shape, E> {
        Ok(Shape::Text)
    }

    fn visit_unit<E>(self) -> Result<Shape, E> {
        Ok(Shape::Null)
    }

    fn visit_none<E>(self) -> Result<Shape, E> {
        Ok(Shape::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Shape, D::Error> {
        Shape::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Shape, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Shape::Sequence)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Shape, A::Error> {
        let mut children = Vec::new();
        while let Some((_, child)) = map.next_entry::<IgnoredAny, Shape>()? {
            children.push(child);
        }
        Ok(Shape::Mapping(children))
    }
}

/// Second pass: read a node of known shape into a document value.
struct Verbatim<'s> {
    shape: &'s Shape,
    syntax: Syntax,
}

impl<'de, 's> DeserializeSeed<'de> for Verbatim<'s> {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        match self.shape {
            Shape::Mapping(children) => deserializer.deserialize_map(MappingVisitor {
                children,
                syntax: self.syntax,
            }),
            Shape::Text => String::deserialize(deserializer).map(Value::String),
            Shape::Scalar => match self.syntax {
                Syntax::Yaml => String::deserialize(deserializer).map(Value::String),
                Syntax::Json => Box::<RawValue>::deserialize(deserializer)
                    .map(|raw| Value::String(raw.get().to_string())),
            },
            Shape::Null => IgnoredAny::deserialize(deserializer).map(|_| Value::Null),
            // Sequences are never secrets; only their presence matters.
            Shape::Sequence => {
                IgnoredAny::deserialize(deserializer).map(|_| Value::Array(Vec::new()))
            }
        }
    }
}

struct MappingVisitor<'s> {
    children: &'s [Shape],
    syntax: Syntax,
}

impl<'de, 's> Visitor<'de> for MappingVisitor<'s> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = Map::new();
        for shape in self.children {
            let name: String = map
                .next_key()?
                .ok_or_else(|| de::Error::custom("mapping shorter than on first read"))?;
            let value = map.next_value_seed(Verbatim {
                shape,
                syntax: self.syntax,
            })?;
            entries.insert(name, value);
        }

        if map.next_key::<IgnoredAny>()?.is_some() {
            return Err(de::Error::custom("mapping longer than on first read"));
        }
        Ok(Value::Object(entries))
    }
}
