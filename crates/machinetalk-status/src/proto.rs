//! Machinetalk protobuf container
//!
//! Only the fields and message types the status client needs are declared;
//! unknown fields of incoming containers are skipped by the decoder.

use bytes::Bytes;
use prost::Message;

/// Message type tag carried by every container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ContainerType {
    MtEmcstatFullUpdate = 10,
    MtEmcstatIncrementalUpdate = 11,
    MtPing = 210,
    MtPingAcknowledge = 215,
}

impl ContainerType {
    /// Wire name of the message type
    pub fn name(&self) -> &'static str {
        match self {
            ContainerType::MtEmcstatFullUpdate => "MT_EMCSTAT_FULL_UPDATE",
            ContainerType::MtEmcstatIncrementalUpdate => "MT_EMCSTAT_INCREMENTAL_UPDATE",
            ContainerType::MtPing => "MT_PING",
            ContainerType::MtPingAcknowledge => "MT_PING_ACKNOWLEDGE",
        }
    }
}

/// Envelope of every Machinetalk message
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Container {
    #[prost(enumeration = "ContainerType", required, tag = "1")]
    pub r#type: i32,

    #[prost(string, repeated, tag = "2")]
    pub note: Vec<String>,
}

impl Container {
    pub fn new(message_type: ContainerType) -> Self {
        Self {
            r#type: message_type as i32,
            note: Vec::new(),
        }
    }

    /// The message type, or `None` for types this client does not know
    pub fn message_type(&self) -> Option<ContainerType> {
        ContainerType::try_from(self.r#type).ok()
    }
}

pub fn encode_container(container: &Container) -> Bytes {
    Bytes::from(container.encode_to_vec())
}

pub fn decode_container(payload: &[u8]) -> Result<Container, prost::DecodeError> {
    Container::decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_format() {
        // field 1, varint 210
        let bytes = encode_container(&Container::new(ContainerType::MtPing));
        assert_eq!(bytes.as_ref(), &[0x08, 0xd2, 0x01]);
    }

    #[test]
    fn test_unknown_type_decodes() {
        // field 1, varint 99
        let container = decode_container(&[0x08, 0x63]).unwrap();
        assert_eq!(container.r#type, 99);
        assert_eq!(container.message_type(), None);
    }

    #[test]
    fn test_notes_survive() {
        let mut container = Container::new(ContainerType::MtPingAcknowledge);
        container.note.push("hello".to_string());
        let decoded = decode_container(&encode_container(&container)).unwrap();
        assert_eq!(decoded.message_type(), Some(ContainerType::MtPingAcknowledge));
        assert_eq!(decoded.note, vec!["hello"]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_container(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(ContainerType::MtPing.name(), "MT_PING");
        assert_eq!(
            ContainerType::MtEmcstatFullUpdate.name(),
            "MT_EMCSTAT_FULL_UPDATE"
        );
    }
}
