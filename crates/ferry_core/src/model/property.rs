use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ContentValue, ModelError};

/// Declared type of a property.
///
/// The tag is carried independently of the values so an empty multi-valued
/// property keeps its type through serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyType {
    String,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
    Reference,
    WeakReference,
    Name,
    Path,
    Uri,
    Decimal,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "STRING",
            PropertyType::Long => "LONG",
            PropertyType::Double => "DOUBLE",
            PropertyType::Boolean => "BOOLEAN",
            PropertyType::Date => "DATE",
            PropertyType::Binary => "BINARY",
            PropertyType::Reference => "REFERENCE",
            PropertyType::WeakReference => "WEAKREFERENCE",
            PropertyType::Name => "NAME",
            PropertyType::Path => "PATH",
            PropertyType::Uri => "URI",
            PropertyType::Decimal => "DECIMAL",
        }
    }

    /// Whether a value of this shape may be stored under this type.
    pub fn accepts(&self, value: &ContentValue) -> bool {
        match (self, value) {
            (PropertyType::Long, ContentValue::Long(_)) => true,
            (PropertyType::Double, ContentValue::Double(_)) => true,
            (PropertyType::Boolean, ContentValue::Boolean(_)) => true,
            (PropertyType::Date, ContentValue::Date(_)) => true,
            (PropertyType::Binary, ContentValue::Binary(_)) => true,
            (
                PropertyType::String
                | PropertyType::Reference
                | PropertyType::WeakReference
                | PropertyType::Name
                | PropertyType::Path
                | PropertyType::Uri
                | PropertyType::Decimal,
                ContentValue::String(_),
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "STRING" => PropertyType::String,
            "LONG" => PropertyType::Long,
            "DOUBLE" => PropertyType::Double,
            "BOOLEAN" => PropertyType::Boolean,
            "DATE" => PropertyType::Date,
            "BINARY" => PropertyType::Binary,
            "REFERENCE" => PropertyType::Reference,
            "WEAKREFERENCE" => PropertyType::WeakReference,
            "NAME" => PropertyType::Name,
            "PATH" => PropertyType::Path,
            "URI" => PropertyType::Uri,
            "DECIMAL" => PropertyType::Decimal,
            other => return Err(ModelError::UnknownType(other.to_string())),
        })
    }
}

/// A named, typed, possibly multi-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertyRepr", into = "PropertyRepr")]
pub struct ContentProperty {
    name: String,
    ty: PropertyType,
    multiple: bool,
    values: Vec<ContentValue>,
}

impl ContentProperty {
    /// Create a property, checking every value against the declared type.
    pub fn new(
        name: impl Into<String>,
        ty: PropertyType,
        multiple: bool,
        values: Vec<ContentValue>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        if !multiple && values.len() != 1 {
            return Err(ModelError::Cardinality {
                property: name,
                count: values.len(),
            });
        }
        if let Some(bad) = values.iter().find(|v| !ty.accepts(v)) {
            return Err(ModelError::TypeMismatch {
                property: name,
                expected: ty,
                actual: bad.kind(),
            });
        }
        Ok(Self {
            name,
            ty,
            multiple,
            values,
        })
    }

    /// Single-valued property.
    pub fn single(
        name: impl Into<String>,
        ty: PropertyType,
        value: impl Into<ContentValue>,
    ) -> Result<Self, ModelError> {
        Self::new(name, ty, false, vec![value.into()])
    }

    /// Single-valued STRING property.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: PropertyType::String,
            multiple: false,
            values: vec![ContentValue::String(value.into())],
        }
    }

    /// Single-valued BOOLEAN property.
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            ty: PropertyType::Boolean,
            multiple: false,
            values: vec![ContentValue::Boolean(value)],
        }
    }

    /// Multi-valued STRING property.
    pub fn strings<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            ty: PropertyType::String,
            multiple: true,
            values: values
                .into_iter()
                .map(|v| ContentValue::String(v.into()))
                .collect(),
        }
    }

    /// Empty multi-valued property of the given type.
    pub fn empty(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            multiple: true,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_type(&self) -> PropertyType {
        self.ty
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn values(&self) -> &[ContentValue] {
        &self.values
    }

    /// First value, the only one for single-valued properties.
    pub fn value(&self) -> Option<&ContentValue> {
        self.values.first()
    }

    /// String views of the values; non-text values are skipped.
    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(ContentValue::as_str)
    }

    /// Replace the value at `index`, keeping type and cardinality.
    pub fn replace_value(&mut self, index: usize, value: ContentValue) -> Result<(), ModelError> {
        if !self.ty.accepts(&value) {
            return Err(ModelError::TypeMismatch {
                property: self.name.clone(),
                expected: self.ty,
                actual: value.kind(),
            });
        }
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
        Ok(())
    }

    /// Append a value, turning the property multi-valued when needed.
    pub fn push_value(&mut self, value: ContentValue) -> Result<(), ModelError> {
        if !self.ty.accepts(&value) {
            return Err(ModelError::TypeMismatch {
                property: self.name.clone(),
                expected: self.ty,
                actual: value.kind(),
            });
        }
        self.multiple = true;
        self.values.push(value);
        Ok(())
    }

    pub(crate) fn values_mut(&mut self) -> &mut [ContentValue] {
        &mut self.values
    }
}

/// Serialized shape shared by the JSON encoding: values in lexical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PropertyRepr {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PropertyType,
    pub multiple: bool,
    #[serde(default)]
    pub values: Vec<String>,
}

impl TryFrom<PropertyRepr> for ContentProperty {
    type Error = ModelError;

    fn try_from(repr: PropertyRepr) -> Result<Self, Self::Error> {
        let values = repr
            .values
            .iter()
            .map(|lexical| ContentValue::parse(repr.ty, lexical))
            .collect::<Result<Vec<_>, _>>()?;
        ContentProperty::new(repr.name, repr.ty, repr.multiple, values)
    }
}

impl From<ContentProperty> for PropertyRepr {
    fn from(property: ContentProperty) -> Self {
        Self {
            values: property.values.iter().map(ContentValue::to_lexical).collect(),
            name: property.name,
            ty: property.ty,
            multiple: property.multiple,
        }
    }
}
