use std::fmt;

use serde::{Deserialize, Serialize};

use crate::representation::Representation;

/// Deepest array rank an attribute value may carry.
pub const MAX_ARRAY_DEPTH: usize = 3;

/// Coarse type tag of a stored attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Null,
    Integer,
    Double,
    Boolean,
    String,
    Representation,
    Vector,
}

impl AttributeType {
    pub fn name(self) -> &'static str {
        match self {
            AttributeType::Null => "Null",
            AttributeType::Integer => "Integer",
            AttributeType::Double => "Double",
            AttributeType::Boolean => "Boolean",
            AttributeType::String => "String",
            AttributeType::Representation => "Representation",
            AttributeType::Vector => "Vector",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Homogeneous array of rank 1 to 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Array<T> {
    Rank1(Vec<T>),
    Rank2(Vec<Vec<T>>),
    Rank3(Vec<Vec<Vec<T>>>),
}

impl<T> Array<T> {
    /// Array rank (1, 2 or 3).
    pub fn depth(&self) -> usize {
        match self {
            Array::Rank1(_) => 1,
            Array::Rank2(_) => 2,
            Array::Rank3(_) => 3,
        }
    }

    /// Outer dimension length.
    pub fn len(&self) -> usize {
        match self {
            Array::Rank1(v) => v.len(),
            Array::Rank2(v) => v.len(),
            Array::Rank3(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every leaf element in row-major order.
    pub fn for_each_element(&self, mut f: impl FnMut(&T)) {
        match self {
            Array::Rank1(v) => v.iter().for_each(f),
            Array::Rank2(v) => v.iter().flatten().for_each(f),
            Array::Rank3(v) => v.iter().flatten().flatten().for_each(&mut f),
        }
    }
}

/// One attribute value: a scalar, a nested representation, or a homogeneous
/// array of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Representation(Box<Representation>),
    IntegerArray(Array<i64>),
    DoubleArray(Array<f64>),
    BooleanArray(Array<bool>),
    StringArray(Array<String>),
    RepresentationArray(Array<Representation>),
}

impl AttributeValue {
    /// Type tag; every array variant reports `Vector`.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Null => AttributeType::Null,
            AttributeValue::Integer(_) => AttributeType::Integer,
            AttributeValue::Double(_) => AttributeType::Double,
            AttributeValue::Boolean(_) => AttributeType::Boolean,
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Representation(_) => AttributeType::Representation,
            AttributeValue::IntegerArray(_)
            | AttributeValue::DoubleArray(_)
            | AttributeValue::BooleanArray(_)
            | AttributeValue::StringArray(_)
            | AttributeValue::RepresentationArray(_) => AttributeType::Vector,
        }
    }

    /// Innermost element type; equal to `attribute_type` for scalars.
    pub fn base_type(&self) -> AttributeType {
        match self {
            AttributeValue::IntegerArray(_) => AttributeType::Integer,
            AttributeValue::DoubleArray(_) => AttributeType::Double,
            AttributeValue::BooleanArray(_) => AttributeType::Boolean,
            AttributeValue::StringArray(_) => AttributeType::String,
            AttributeValue::RepresentationArray(_) => AttributeType::Representation,
            other => other.attribute_type(),
        }
    }

    /// Array rank, 0 for scalars.
    pub fn depth(&self) -> usize {
        match self {
            AttributeValue::IntegerArray(a) => a.depth(),
            AttributeValue::DoubleArray(a) => a.depth(),
            AttributeValue::BooleanArray(a) => a.depth(),
            AttributeValue::StringArray(a) => a.depth(),
            AttributeValue::RepresentationArray(a) => a.depth(),
            _ => 0,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Human-readable type label including rank, e.g. `Integer[][]`.
    pub fn type_label(&self) -> &'static str {
        match (self.base_type(), self.depth()) {
            (AttributeType::Null, _) => "Null",
            (AttributeType::Integer, 0) => "Integer",
            (AttributeType::Integer, 1) => "Integer[]",
            (AttributeType::Integer, 2) => "Integer[][]",
            (AttributeType::Integer, _) => "Integer[][][]",
            (AttributeType::Double, 0) => "Double",
            (AttributeType::Double, 1) => "Double[]",
            (AttributeType::Double, 2) => "Double[][]",
            (AttributeType::Double, _) => "Double[][][]",
            (AttributeType::Boolean, 0) => "Boolean",
            (AttributeType::Boolean, 1) => "Boolean[]",
            (AttributeType::Boolean, 2) => "Boolean[][]",
            (AttributeType::Boolean, _) => "Boolean[][][]",
            (AttributeType::String, 0) => "String",
            (AttributeType::String, 1) => "String[]",
            (AttributeType::String, 2) => "String[][]",
            (AttributeType::String, _) => "String[][][]",
            (AttributeType::Representation, 0) => "Representation",
            (AttributeType::Representation, 1) => "Representation[]",
            (AttributeType::Representation, 2) => "Representation[][]",
            (AttributeType::Representation, _) => "Representation[][][]",
            (AttributeType::Vector, _) => "Vector",
        }
    }
}

fn write_rank1<T>(f: &mut fmt::Formatter<'_>, items: &[T], leaf: &dyn Fn(&T) -> String) -> fmt::Result {
    f.write_str("[")?;
    for item in items {
        write!(f, "{} ", leaf(item))?;
    }
    f.write_str("]")
}

fn write_array<T>(f: &mut fmt::Formatter<'_>, array: &Array<T>, leaf: &dyn Fn(&T) -> String) -> fmt::Result {
    match array {
        Array::Rank1(v) => write_rank1(f, v, leaf),
        Array::Rank2(v) => {
            f.write_str("[")?;
            for row in v {
                write_rank1(f, row, leaf)?;
                f.write_str(" ")?;
            }
            f.write_str("]")
        }
        Array::Rank3(v) => {
            f.write_str("[")?;
            for plane in v {
                f.write_str("[")?;
                for row in plane {
                    write_rank1(f, row, leaf)?;
                    f.write_str(" ")?;
                }
                f.write_str("] ")?;
            }
            f.write_str("]")
        }
    }
}

const REPRESENTATION_PLACEHOLDER: &str = "Representation";

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => f.write_str("(null)"),
            AttributeValue::Integer(v) => write!(f, "{v}"),
            AttributeValue::Double(v) => write!(f, "{v}"),
            AttributeValue::Boolean(v) => f.write_str(if *v { "true" } else { "false" }),
            AttributeValue::String(v) => f.write_str(v),
            AttributeValue::Representation(_) => f.write_str(REPRESENTATION_PLACEHOLDER),
            AttributeValue::IntegerArray(a) => write_array(f, a, &|v| v.to_string()),
            AttributeValue::DoubleArray(a) => write_array(f, a, &|v| v.to_string()),
            AttributeValue::BooleanArray(a) => write_array(f, a, &|v| v.to_string()),
            AttributeValue::StringArray(a) => write_array(f, a, &|v| v.clone()),
            AttributeValue::RepresentationArray(a) => {
                write_array(f, a, &|_| REPRESENTATION_PLACEHOLDER.to_string())
            }
        }
    }
}

/// Rust types that can be stored in and read back from an attribute map.
pub trait AttributeKind: Sized {
    /// Label used in type-mismatch errors.
    const LABEL: &'static str;

    fn into_value(self) -> AttributeValue;

    /// Returns a copy when `value` holds exactly this type and rank.
    fn from_value(value: &AttributeValue) -> Option<Self>;
}

macro_rules! scalar_kind {
    ($ty:ty, $variant:ident, $label:expr) => {
        impl AttributeKind for $ty {
            const LABEL: &'static str = $label;

            fn into_value(self) -> AttributeValue {
                AttributeValue::$variant(self)
            }

            fn from_value(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for AttributeValue {
            fn from(value: $ty) -> Self {
                value.into_value()
            }
        }
    };
}

macro_rules! array_kinds {
    ($elem:ty, $variant:ident, $l1:expr, $l2:expr, $l3:expr) => {
        array_kinds!(@rank Vec<$elem>, $variant, Rank1, $l1);
        array_kinds!(@rank Vec<Vec<$elem>>, $variant, Rank2, $l2);
        array_kinds!(@rank Vec<Vec<Vec<$elem>>>, $variant, Rank3, $l3);
    };
    (@rank $ty:ty, $variant:ident, $rank:ident, $label:expr) => {
        impl AttributeKind for $ty {
            const LABEL: &'static str = $label;

            fn into_value(self) -> AttributeValue {
                AttributeValue::$variant(Array::$rank(self))
            }

            fn from_value(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(Array::$rank(v)) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for AttributeValue {
            fn from(value: $ty) -> Self {
                value.into_value()
            }
        }
    };
}

scalar_kind!(i64, Integer, "Integer");
scalar_kind!(f64, Double, "Double");
scalar_kind!(bool, Boolean, "Boolean");
scalar_kind!(String, String, "String");

array_kinds!(i64, IntegerArray, "Integer[]", "Integer[][]", "Integer[][][]");
array_kinds!(f64, DoubleArray, "Double[]", "Double[][]", "Double[][][]");
array_kinds!(bool, BooleanArray, "Boolean[]", "Boolean[][]", "Boolean[][][]");
array_kinds!(String, StringArray, "String[]", "String[][]", "String[][][]");
array_kinds!(
    Representation,
    RepresentationArray,
    "Representation[]",
    "Representation[][]",
    "Representation[][][]"
);

impl AttributeKind for Representation {
    const LABEL: &'static str = "Representation";

    fn into_value(self) -> AttributeValue {
        AttributeValue::Representation(Box::new(self))
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Representation(v) => Some(v.as_ref().clone()),
            _ => None,
        }
    }
}

impl From<Representation> for AttributeValue {
    fn from(value: Representation) -> Self {
        value.into_value()
    }
}

impl From<&Representation> for AttributeValue {
    fn from(value: &Representation) -> Self {
        value.clone().into_value()
    }
}

// Integer literals fall back to i32.
impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(i64::from(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(value: Vec<&str>) -> Self {
        AttributeValue::StringArray(Array::Rank1(
            value.into_iter().map(str::to_string).collect(),
        ))
    }
}
