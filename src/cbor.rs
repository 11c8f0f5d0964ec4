// SPDX-License-Identifier: MIT OR Apache-2.0

//! CBOR encoding for persistent state.
//!
//! CBOR is self-describing, so records stay readable across releases as long as field names are
//! kept stable.
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Encodes a value into its CBOR representation.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decodes a value from its CBOR representation.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(ciborium::de::from_reader(bytes)?)
}

#[derive(Debug, Error)]
pub enum EncodeError {
    /// An error occurred while writing bytes.
    #[error("an error occurred while writing bytes: {0}")]
    Io(std::io::Error),

    /// A value cannot be represented in the encoding.
    #[error("an error occurred while serializing value: {0}")]
    Value(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for EncodeError {
    fn from(value: ciborium::ser::Error<std::io::Error>) -> Self {
        match value {
            ciborium::ser::Error::Io(err) => EncodeError::Io(err),
            ciborium::ser::Error::Value(err) => EncodeError::Value(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// An error occurred while reading bytes.
    #[error("an error occurred while reading bytes: {0}")]
    Io(std::io::Error),

    /// A syntax error in the byte stream, with its offset.
    #[error("an error occurred while parsing bytes at position {0}")]
    Syntax(usize),

    /// A parsed value could not be processed.
    #[error("an error occurred while processing a parsed value at position {0:?}: {1}")]
    Semantic(Option<usize>, String),

    /// The input caused the decoder to recurse too much.
    #[error("recursion limit exceeded while decoding")]
    RecursionLimitExceeded,
}

impl From<ciborium::de::Error<std::io::Error>> for DecodeError {
    fn from(value: ciborium::de::Error<std::io::Error>) -> Self {
        match value {
            ciborium::de::Error::Io(err) => DecodeError::Io(err),
            ciborium::de::Error::Syntax(offset) => DecodeError::Syntax(offset),
            ciborium::de::Error::Semantic(offset, description) => {
                DecodeError::Semantic(offset, description)
            }
            ciborium::de::Error::RecursionLimitExceeded => DecodeError::RecursionLimitExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{decode, encode};

    #[test]
    fn encode_decode() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Record {
            name: String,
            counters: Vec<u32>,
        }

        let record = Record {
            name: "chinampa".into(),
            counters: vec![0, 1, 2],
        };

        let bytes = encode(&record).unwrap();
        let record_again: Record = decode(&bytes).unwrap();

        assert_eq!(record, record_again);
    }
}
