//! AMF0 serialization for RTMP command payloads

pub mod amf0;
pub mod value;

pub use value::{Amf0Object, Amf0Value};
