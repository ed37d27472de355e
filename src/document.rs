//! Caller-facing document model.
//!
//! Analysis is outside this crate: callers hand over pre-analyzed term
//! lists alongside the stored values. A field may be stored, indexed, or
//! both.

use crate::error::{Result, StrataError};

/// A storable field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// No value. Not storable; rejected at write time.
    Null,
}

impl FieldValue {
    /// Human-readable name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Binary(_) => "binary",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Null => "null",
        }
    }

    /// Ensure this value has a storable representation.
    pub fn check_storable(&self, field_name: &str) -> Result<()> {
        match self {
            FieldValue::Null => Err(StrataError::invalid_field_value(format!(
                "field '{field_name}' has no binary, string or numeric value"
            ))),
            _ => Ok(()),
        }
    }
}

/// One field of a document: an optional stored value plus optional
/// pre-analyzed index terms.
#[derive(Debug, Clone)]
pub struct DocField {
    /// Field name.
    pub name: String,
    /// Value to persist in the stored-fields file, if any.
    pub stored: Option<FieldValue>,
    /// Pre-analyzed terms to index, in token order, if any.
    pub terms: Option<Vec<String>>,
}

/// A document: an ordered collection of fields.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// The document's fields, in insertion order.
    pub fields: Vec<DocField>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Add a stored-only field.
    pub fn add_stored<S: Into<String>>(&mut self, name: S, value: FieldValue) -> &mut Self {
        self.fields.push(DocField {
            name: name.into(),
            stored: Some(value),
            terms: None,
        });
        self
    }

    /// Add an indexed-only field with pre-analyzed terms.
    pub fn add_indexed<S: Into<String>>(&mut self, name: S, terms: Vec<String>) -> &mut Self {
        self.fields.push(DocField {
            name: name.into(),
            stored: None,
            terms: Some(terms),
        });
        self
    }

    /// Add a field that is both stored and indexed.
    pub fn add_stored_and_indexed<S: Into<String>>(
        &mut self,
        name: S,
        value: FieldValue,
        terms: Vec<String>,
    ) -> &mut Self {
        self.fields.push(DocField {
            name: name.into(),
            stored: Some(value),
            terms: Some(terms),
        });
        self
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_building() {
        let mut doc = Document::new();
        doc.add_stored("id", FieldValue::Long(42))
            .add_stored_and_indexed(
                "title",
                FieldValue::Text("hello world".to_string()),
                vec!["hello".to_string(), "world".to_string()],
            )
            .add_indexed("body", vec!["only".to_string(), "indexed".to_string()]);

        assert_eq!(doc.len(), 3);
        assert!(doc.fields[0].terms.is_none());
        assert!(doc.fields[2].stored.is_none());
    }

    #[test]
    fn test_null_is_not_storable() {
        assert!(FieldValue::Null.check_storable("f").is_err());
        assert!(FieldValue::Int(0).check_storable("f").is_ok());
    }
}
