//! Crypto module - key types, marshalling and validation.
//!
//! - [`KeyMarshaller`] - encodes keys into their protobuf envelope and back
//! - [`KeyValidator`] - pluggable structural checks run on every unmarshal

mod key;
mod marshaller;
mod validator;

pub use key::{Key, KeyPair, KeyType, PrivateKey, PublicKey};
pub use marshaller::KeyMarshaller;
pub(crate) use marshaller::KeyEnvelope;
pub use validator::{DefaultKeyValidator, KeyValidator};
