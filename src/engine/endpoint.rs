//! Endpoint metadata exposed by a loaded engine.

use std::fmt;

use serde::Serialize;

use crate::sema::types::Type;
use crate::syntax::ast::{Direction, EndpointKind};

/// Opaque handle used for all data exchange with a performer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EndpointHandle(pub u32);

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of one top-level input or output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDetails {
    #[serde(rename = "endpointID")]
    pub id: String,
    pub endpoint_type: EndpointKind,
    pub data_type: Type,
    pub direction: Direction,
    pub handle: EndpointHandle,
}

impl EndpointDetails {
    /// Samples per stream frame: the vector width, or 1.
    pub fn channels(&self) -> usize {
        match self.data_type {
            Type::Vector(_, n) => n as usize,
            _ => 1,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.endpoint_type == EndpointKind::Stream
    }

    pub fn is_event(&self) -> bool {
        self.endpoint_type == EndpointKind::Event
    }

    pub fn is_value(&self) -> bool {
        self.endpoint_type == EndpointKind::Value
    }
}

/// An `external` variable the caller must supply before linking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalVariable {
    /// `Processor::name`
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::PrimitiveType;

    #[test]
    fn channels_follow_vector_width() {
        let mut details = EndpointDetails {
            id: "out".into(),
            endpoint_type: EndpointKind::Stream,
            data_type: Type::Vector(PrimitiveType::Float32, 2),
            direction: Direction::Output,
            handle: EndpointHandle(1),
        };
        assert_eq!(details.channels(), 2);
        details.data_type = Type::FLOAT32;
        assert_eq!(details.channels(), 1);
    }

    #[test]
    fn serialises_with_script_field_names() {
        let details = EndpointDetails {
            id: "in".into(),
            endpoint_type: EndpointKind::Event,
            data_type: Type::INT32,
            direction: Direction::Input,
            handle: EndpointHandle(0),
        };
        let yaml = serde_yaml::to_string(&details).unwrap();
        assert!(yaml.contains("endpointID: in"));
        assert!(yaml.contains("endpointType: event"));
        assert!(yaml.contains("dataType: int32"));
    }
}
