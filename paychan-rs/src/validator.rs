use crate::{
    decimal::parse_amount,
    error::Error,
    types::{Message, Transfer},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

/// Stateless structural checks applied to every transfer and message that
/// crosses the plugin boundary, in either direction.
#[derive(Clone, Debug)]
pub struct Validator {
    prefix: String,
    account: String,
    peer: String,
}

impl Validator {
    pub fn new(prefix: &str, account: &str, peer: &str) -> Self {
        Self { prefix: prefix.to_string(), account: account.to_string(), peer: peer.to_string() }
    }

    pub fn validate_incoming_transfer(&self, transfer: &Transfer) -> Result<(), Error> {
        self.validate_transfer(transfer)?;
        self.assert_address("from", &transfer.from, &self.peer)?;
        self.assert_address("to", &transfer.to, &self.account)
    }

    pub fn validate_outgoing_transfer(&self, transfer: &Transfer) -> Result<(), Error> {
        self.validate_transfer(transfer)?;
        self.assert_address("from", &transfer.from, &self.account)?;
        self.assert_address("to", &transfer.to, &self.peer)
    }

    pub fn validate_incoming_message(&self, message: &Message) -> Result<(), Error> {
        self.validate_message(message)?;
        self.assert_address("from", &message.from, &self.peer)?;
        self.assert_address("to", &message.to, &self.account)
    }

    pub fn validate_outgoing_message(&self, message: &Message) -> Result<(), Error> {
        self.validate_message(message)?;
        self.assert_address("from", &message.from, &self.account)?;
        self.assert_address("to", &message.to, &self.peer)
    }

    fn validate_transfer(&self, transfer: &Transfer) -> Result<(), Error> {
        if transfer.ledger != self.prefix {
            return Err(Error::InvalidFields(format!(
                "transfer ledger `{}` does not match prefix `{}`",
                transfer.ledger, self.prefix
            )))
        }
        parse_amount(&transfer.amount)?;
        decode_condition(&transfer.execution_condition)?;
        Ok(())
    }

    fn validate_message(&self, message: &Message) -> Result<(), Error> {
        if message.ledger != self.prefix {
            return Err(Error::InvalidFields(format!(
                "message ledger `{}` does not match prefix `{}`",
                message.ledger, self.prefix
            )))
        }
        Ok(())
    }

    fn assert_address(&self, field: &str, actual: &str, expected: &str) -> Result<(), Error> {
        if actual != expected {
            return Err(Error::InvalidFields(format!(
                "{field} address `{actual}` does not match `{expected}`"
            )))
        }
        Ok(())
    }
}

/// Decode a 43-character base64url encoding of 32 bytes, the shape shared by
/// execution conditions and fulfillments.
fn decode_preimage_hash(kind: &str, value: &str) -> Result<[u8; 32], Error> {
    if value.len() != 43 {
        return Err(Error::InvalidFields(format!("{kind} must be 43 base64url characters")))
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|err| Error::InvalidFields(format!("{kind} is not base64url: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidFields(format!("{kind} must encode exactly 32 bytes")))
}

pub fn decode_condition(condition: &str) -> Result<[u8; 32], Error> {
    decode_preimage_hash("execution condition", condition)
}

pub fn decode_fulfillment(fulfillment: &str) -> Result<[u8; 32], Error> {
    decode_preimage_hash("fulfillment", fulfillment)
}

/// The single cryptographic check of the protocol:
/// `SHA-256(fulfillment) == execution_condition`.
pub fn fulfillment_matches_condition(fulfillment: &str, condition: &str) -> Result<bool, Error> {
    let preimage = decode_fulfillment(fulfillment)?;
    let expected = decode_condition(condition)?;
    let digest = Sha256::digest(preimage);
    Ok(digest.as_slice() == expected)
}

/// Base64url encoding of a 32-byte digest, for building conditions.
pub fn condition_from_preimage(preimage: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(preimage))
}
