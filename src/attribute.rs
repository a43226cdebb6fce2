//! Non-standard attributes and the prototype registry used to interpret
//! them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// An opaque decoded attribute payload.
pub type AttributePayload = Arc<dyn Any + Send + Sync>;

/// Decodes and encodes the body of one attribute kind.
pub trait AttributePrototype: fmt::Debug + Send + Sync {
    fn decode(&self, info: &[u8]) -> Result<AttributePayload>;

    fn encode(&self, payload: &AttributePayload) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub enum AttributeContent {
    /// Bytes kept exactly as they were read.
    Raw(Vec<u8>),
    Decoded {
        prototype: Arc<dyn AttributePrototype>,
        payload: AttributePayload,
    },
}

impl fmt::Debug for AttributeContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeContent::Raw(bytes) => f.debug_tuple("Raw").field(bytes).finish(),
            AttributeContent::Decoded { prototype, .. } => {
                f.debug_struct("Decoded").field("prototype", prototype).finish_non_exhaustive()
            }
        }
    }
}

/// An attribute that is not translated field by field.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub content: AttributeContent,
}

impl Attribute {
    pub fn raw(name: impl Into<String>, info: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: AttributeContent::Raw(info),
        }
    }

    pub fn decoded(
        name: impl Into<String>,
        prototype: Arc<dyn AttributePrototype>,
        payload: AttributePayload,
    ) -> Self {
        Self {
            name: name.into(),
            content: AttributeContent::Decoded { prototype, payload },
        }
    }

    /// The attribute body as it will be written.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match &self.content {
            AttributeContent::Raw(bytes) => Ok(bytes.clone()),
            AttributeContent::Decoded { prototype, payload } => prototype.encode(payload),
        }
    }

    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            AttributeContent::Raw(bytes) => Some(bytes),
            AttributeContent::Decoded { .. } => None,
        }
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        match &self.content {
            AttributeContent::Raw(_) => None,
            AttributeContent::Decoded { payload, .. } => payload.downcast_ref::<T>(),
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        match (&self.content, &other.content) {
            (AttributeContent::Raw(a), AttributeContent::Raw(b)) => a == b,
            (
                AttributeContent::Decoded { payload: a, .. },
                AttributeContent::Decoded { payload: b, .. },
            ) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

/// Maps attribute names to the prototypes that understand them.
#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    prototypes: HashMap<String, Arc<dyn AttributePrototype>>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        prototype: Arc<dyn AttributePrototype>,
    ) -> &mut Self {
        self.prototypes.insert(name.into(), prototype);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AttributePrototype>> {
        self.prototypes.get(name)
    }

    /// Decodes an attribute body, keeping it raw when no prototype is
    /// registered for `name`.
    pub fn decode(&self, name: &str, info: &[u8]) -> Result<Attribute> {
        match self.prototypes.get(name) {
            Some(prototype) => {
                let payload = prototype.decode(info)?;
                Ok(Attribute::decoded(name, prototype.clone(), payload))
            }
            None => Ok(Attribute::raw(name, info.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter;

    impl AttributePrototype for Counter {
        fn decode(&self, info: &[u8]) -> Result<AttributePayload> {
            Ok(Arc::new(info.len() as u32))
        }

        fn encode(&self, payload: &AttributePayload) -> Result<Vec<u8>> {
            let count = payload.downcast_ref::<u32>().copied().unwrap_or(0);
            Ok(vec![0; count as usize])
        }
    }

    #[test]
    fn unregistered_attributes_stay_raw() {
        let registry = AttributeRegistry::new();
        let attribute = registry.decode("Vendor", &[1, 2, 3]).unwrap();
        assert_eq!(attribute.raw_bytes(), Some(&[1u8, 2, 3][..]));
        assert_eq!(attribute.encode().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn registered_prototype_decodes_payload() {
        let mut registry = AttributeRegistry::new();
        registry.register("Counter", Arc::new(Counter));
        let attribute = registry.decode("Counter", &[9, 9]).unwrap();
        assert_eq!(attribute.payload::<u32>(), Some(&2));
        assert_eq!(attribute.encode().unwrap(), vec![0, 0]);
        assert!(attribute.raw_bytes().is_none());
    }
}
