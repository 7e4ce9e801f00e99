use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset, SecondsFormat};

use super::{ModelError, PropertyType};

/// URL prefix of an inline (embedded) binary payload.
pub const DATA_URL_PREFIX: &str = "data:application/octet-stream;base64,";

/// URL prefix of a binary payload stored as a sibling file in the bundle.
pub const BUNDLE_URL_PREFIX: &str = "bundle:";

/// Binary payload, either embedded or pointing at a file in the bundle.
#[derive(Clone, PartialEq, Eq)]
pub enum BinaryValue {
    Inline(Vec<u8>),
    External { locator: String },
}

impl BinaryValue {
    /// Render as a URL, `data:` for inline payloads and `bundle:` for external ones.
    pub fn to_url(&self) -> String {
        match self {
            BinaryValue::Inline(data) => format!("{}{}", DATA_URL_PREFIX, BASE64.encode(data)),
            BinaryValue::External { locator } => format!("{}{}", BUNDLE_URL_PREFIX, locator),
        }
    }

    pub fn from_url(url: &str) -> Result<Self, ModelError> {
        if let Some(encoded) = url.strip_prefix(DATA_URL_PREFIX) {
            let data = BASE64
                .decode(encoded)
                .map_err(|e| ModelError::InvalidValue {
                    ty: PropertyType::Binary,
                    value: truncate(url),
                    reason: e.to_string(),
                })?;
            return Ok(BinaryValue::Inline(data));
        }
        if let Some(locator) = url.strip_prefix(BUNDLE_URL_PREFIX) {
            if locator.is_empty()
                || locator.starts_with('/')
                || locator.split('/').any(|segment| segment == "..")
            {
                return Err(ModelError::InvalidLocator(url.to_string()));
            }
            return Ok(BinaryValue::External {
                locator: locator.to_string(),
            });
        }
        Err(ModelError::InvalidLocator(truncate(url)))
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, BinaryValue::Inline(_))
    }
}

impl std::fmt::Debug for BinaryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryValue::Inline(data) => write!(f, "Inline({} bytes)", data.len()),
            BinaryValue::External { locator } => write!(f, "External({})", locator),
        }
    }
}

/// One property value.
///
/// Text-like property types (STRING, NAME, PATH, URI, REFERENCE,
/// WEAKREFERENCE, DECIMAL) all carry [`ContentValue::String`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContentValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Binary(BinaryValue),
}

impl ContentValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentValue::String(_) => "string",
            ContentValue::Long(_) => "long",
            ContentValue::Double(_) => "double",
            ContentValue::Boolean(_) => "boolean",
            ContentValue::Date(_) => "date",
            ContentValue::Binary(_) => "binary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContentValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryValue> {
        match self {
            ContentValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Canonical lexical form used by both snapshot formats.
    pub fn to_lexical(&self) -> String {
        match self {
            ContentValue::String(s) => s.clone(),
            ContentValue::Long(v) => v.to_string(),
            ContentValue::Double(v) => v.to_string(),
            ContentValue::Boolean(v) => v.to_string(),
            ContentValue::Date(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            ContentValue::Binary(b) => b.to_url(),
        }
    }

    /// Parse the lexical form of a value of the given type.
    pub fn parse(ty: PropertyType, lexical: &str) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::InvalidValue {
            ty,
            value: truncate(lexical),
            reason,
        };
        match ty {
            PropertyType::Long => lexical
                .parse::<i64>()
                .map(ContentValue::Long)
                .map_err(|e| invalid(e.to_string())),
            PropertyType::Double => lexical
                .parse::<f64>()
                .map(ContentValue::Double)
                .map_err(|e| invalid(e.to_string())),
            PropertyType::Boolean => match lexical {
                "true" => Ok(ContentValue::Boolean(true)),
                "false" => Ok(ContentValue::Boolean(false)),
                other => Err(invalid(format!("expected true or false, got '{}'", other))),
            },
            PropertyType::Date => DateTime::parse_from_rfc3339(lexical)
                .map(ContentValue::Date)
                .map_err(|e| invalid(e.to_string())),
            PropertyType::Binary => BinaryValue::from_url(lexical).map(ContentValue::Binary),
            _ => Ok(ContentValue::String(lexical.to_string())),
        }
    }
}

impl From<&str> for ContentValue {
    fn from(value: &str) -> Self {
        ContentValue::String(value.to_string())
    }
}

impl From<String> for ContentValue {
    fn from(value: String) -> Self {
        ContentValue::String(value)
    }
}

impl From<i64> for ContentValue {
    fn from(value: i64) -> Self {
        ContentValue::Long(value)
    }
}

impl From<f64> for ContentValue {
    fn from(value: f64) -> Self {
        ContentValue::Double(value)
    }
}

impl From<bool> for ContentValue {
    fn from(value: bool) -> Self {
        ContentValue::Boolean(value)
    }
}

impl From<BinaryValue> for ContentValue {
    fn from(value: BinaryValue) -> Self {
        ContentValue::Binary(value)
    }
}

fn truncate(value: &str) -> String {
    const MAX: usize = 64;
    if value.len() <= MAX {
        return value.to_string();
    }
    let mut end = MAX;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}
