//! Hub message types
//!
//! Hand-written prost structs for the subset of the hub schema used to submit
//! casts. Field tags follow `message.proto`.

/// Envelope submitted to a hub
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(message, optional, tag = "1")]
    pub data: Option<MessageData>,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    #[prost(enumeration = "HashScheme", tag = "3")]
    pub hash_scheme: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
    #[prost(enumeration = "SignatureScheme", tag = "5")]
    pub signature_scheme: i32,
    #[prost(bytes = "vec", tag = "6")]
    pub signer: Vec<u8>,
    /// Encoded `MessageData` that `hash` was computed over. Stands in for
    /// `data` so the hub hashes exactly these bytes.
    #[prost(bytes = "vec", optional, tag = "7")]
    pub data_bytes: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageData {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    #[prost(uint64, tag = "2")]
    pub fid: u64,
    /// Seconds since the Farcaster epoch
    #[prost(uint32, tag = "3")]
    pub timestamp: u32,
    #[prost(enumeration = "FarcasterNetwork", tag = "4")]
    pub network: i32,
    #[prost(oneof = "message_data::Body", tags = "5")]
    pub body: Option<message_data::Body>,
}

pub mod message_data {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "5")]
        CastAddBody(super::CastAddBody),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CastAddBody {
    #[prost(uint64, repeated, tag = "2")]
    pub mentions: Vec<u64>,
    #[prost(oneof = "cast_add_body::Parent", tags = "3, 7")]
    pub parent: Option<cast_add_body::Parent>,
    #[prost(string, tag = "4")]
    pub text: String,
    #[prost(uint32, repeated, tag = "5")]
    pub mentions_positions: Vec<u32>,
    #[prost(message, repeated, tag = "6")]
    pub embeds: Vec<Embed>,
}

pub mod cast_add_body {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Parent {
        #[prost(message, tag = "3")]
        ParentCastId(super::CastId),
        #[prost(string, tag = "7")]
        ParentUrl(String),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CastId {
    #[prost(uint64, tag = "1")]
    pub fid: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Embed {
    #[prost(oneof = "embed::Embed", tags = "1, 2")]
    pub embed: Option<embed::Embed>,
}

pub mod embed {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Embed {
        #[prost(string, tag = "1")]
        Url(String),
        #[prost(message, tag = "2")]
        CastId(super::CastId),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    None = 0,
    CastAdd = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FarcasterNetwork {
    None = 0,
    Mainnet = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HashScheme {
    None = 0,
    Blake3 = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SignatureScheme {
    None = 0,
    Ed25519 = 1,
}
