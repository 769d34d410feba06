use thiserror::Error;

pub type Result<T> = std::result::Result<T, DefineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefineError {
    #[error("property {property:?}: unknown type {key:?}")]
    UnknownType { property: String, key: String },

    #[error("property {property:?}: malformed descriptor ({reason})")]
    MalformedDescriptor { property: String, reason: String },

    #[error("cannot add property {property:?} to sealed {type_name} instance")]
    Sealed { property: String, type_name: String },

    #[error("{type_name} has no method {name:?}")]
    UnknownMethod { name: String, type_name: String },
}

impl DefineError {
    #[must_use]
    pub fn unknown_type(property: impl Into<String>, key: impl Into<String>) -> Self {
        Self::UnknownType {
            property: property.into(),
            key: key.into(),
        }
    }

    #[must_use]
    pub fn malformed(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// The property (or method) name the error is about.
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::UnknownType { property, .. }
            | Self::MalformedDescriptor { property, .. }
            | Self::Sealed { property, .. } => property,
            Self::UnknownMethod { name, .. } => name,
        }
    }
}
