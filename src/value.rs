//! Values, column definitions and records.
//!
//! A [`Record`] is positional: `values[i]` belongs to `columns[i]` of the
//! entity it was read from. `None` is SQL NULL.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, VectraError};
use crate::types::TupleId;

/// Longest vector a column may declare.
pub const MAX_VECTOR_DIMENSION: usize = 65_536;

/// One element of a complex vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex32 {
    /// Real part.
    pub re: f32,
    /// Imaginary part.
    pub im: f32,
}

impl Complex32 {
    /// Creates a complex number.
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

/// A stored or queried value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Real vector.
    FloatVector(Vec<f32>),
    /// Complex vector.
    ComplexVector(Vec<Complex32>),
}

impl Value {
    /// Human readable name of the value's type, used in type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::FloatVector(_) => "float vector",
            Self::ComplexVector(_) => "complex vector",
        }
    }

    /// Returns the components if this is a real vector.
    pub fn as_float_vector(&self) -> Option<&[f32]> {
        match self {
            Self::FloatVector(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for real and complex vectors.
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::FloatVector(_) | Self::ComplexVector(_))
    }

    /// Returns true if this is a complex vector.
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::ComplexVector(_))
    }

    /// Number of vector elements, `None` for scalars.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            Self::FloatVector(v) => Some(v.len()),
            Self::ComplexVector(v) => Some(v.len()),
            _ => None,
        }
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Self::FloatVector(v)
    }
}

impl From<Vec<Complex32>> for Value {
    fn from(v: Vec<Complex32>) -> Self {
        Self::ComplexVector(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Declared type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Real vector of the given dimension.
    FloatVector(usize),
    /// Complex vector of the given dimension.
    ComplexVector(usize),
}

impl ColumnType {
    /// Vector dimension, `None` for scalar columns.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            Self::FloatVector(d) | Self::ComplexVector(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns true for vector columns.
    pub fn is_vector(&self) -> bool {
        self.dimension().is_some()
    }

    /// Returns true for scalar columns.
    pub fn is_scalar(&self) -> bool {
        !self.is_vector()
    }

    /// Human readable name, matching [`Value::type_name`].
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::FloatVector(_) => "float vector",
            Self::ComplexVector(_) => "complex vector",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Long, Value::Long(_))
                | (Self::Double, Value::Double(_))
                | (Self::String, Value::String(_))
                | (Self::FloatVector(_), Value::FloatVector(_))
                | (Self::ComplexVector(_), Value::ComplexVector(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimension() {
            Some(d) => write!(f, "{}({})", self.type_name(), d),
            None => f.write_str(self.type_name()),
        }
    }
}

/// Column definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, unique within the entity.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
    /// Whether NULL is accepted.
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a non-nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Creates a nullable column.
    pub fn nullable(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Checks one value against this column.
    pub fn check(&self, value: Option<&Value>) -> Result<(), VectraError> {
        let Some(value) = value else {
            if self.nullable {
                return Ok(());
            }
            return Err(ValidationError::required_field(&self.name).into());
        };

        if !self.column_type.accepts(value) {
            return Err(VectraError::type_mismatch(
                &self.name,
                self.column_type.type_name(),
                value.type_name(),
            ));
        }

        if let (Some(expected), Some(got)) = (self.column_type.dimension(), value.dimension()) {
            if expected != got {
                return Err(ValidationError::dimension_mismatch(expected, got).into());
            }
        }

        Ok(())
    }
}

/// Validates a set of column definitions for a new entity.
pub fn validate_columns(columns: &[ColumnDef]) -> Result<(), ValidationError> {
    if columns.is_empty() {
        return Err(ValidationError::required_field("columns"));
    }
    for (i, column) in columns.iter().enumerate() {
        if column.name.trim().is_empty() {
            return Err(ValidationError::invalid_field(
                "columns",
                format!("column {} has an empty name", i),
            ));
        }
        if columns[..i].iter().any(|c| c.name == column.name) {
            return Err(ValidationError::invalid_field(
                "columns",
                format!("duplicate column name '{}'", column.name),
            ));
        }
        if let Some(dim) = column.column_type.dimension() {
            if dim == 0 || dim > MAX_VECTOR_DIMENSION {
                return Err(ValidationError::invalid_field(
                    &column.name,
                    format!("vector dimension must be between 1 and {}", MAX_VECTOR_DIMENSION),
                ));
            }
        }
    }
    Ok(())
}

/// Validates a full row against the entity's columns.
pub fn validate_row(columns: &[ColumnDef], values: &[Option<Value>]) -> Result<(), VectraError> {
    if values.len() != columns.len() {
        return Err(ValidationError::invalid_field(
            "values",
            format!("expected {} values, got {}", columns.len(), values.len()),
        )
        .into());
    }
    for (column, value) in columns.iter().zip(values) {
        column.check(value.as_ref())?;
    }
    Ok(())
}

/// A stored row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier of the row.
    pub tuple_id: TupleId,
    /// Positional values, one per entity column.
    pub values: Vec<Option<Value>>,
}

impl Record {
    /// Creates a record.
    pub fn new(tuple_id: TupleId, values: Vec<Option<Value>>) -> Self {
        Self { tuple_id, values }
    }

    /// Value at a column position; `None` for NULL or out of range.
    pub fn value(&self, column: usize) -> Option<&Value> {
        self.values.get(column).and_then(Option::as_ref)
    }
}
