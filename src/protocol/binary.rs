//! Binary record serialization (protobuf layout: event = 1, args = 2, id = 3)

use prost::Message as _;

use crate::error::{Result, RoomcastError};
use crate::protocol::Message;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    #[prost(string, tag = "1")]
    pub event: String,
    #[prost(string, tag = "2")]
    pub args: String,
    #[prost(string, tag = "3")]
    pub id: String,
}

pub fn encode(event: &str, args: &str, id: &str) -> Vec<u8> {
    Record {
        event: event.to_owned(),
        args: args.to_owned(),
        id: id.to_owned(),
    }
    .encode_to_vec()
}

pub fn decode(data: &[u8]) -> Result<Message> {
    let record = Record::decode(data)?;
    if record.event.is_empty() {
        return Err(RoomcastError::MalformedFrame("empty event name".to_string()));
    }

    Ok(Message {
        event: record.event,
        args: record.args,
        id: record.id,
    })
}
