//! Messaging endpoint payloads.
//!
//! Everything here is ciphertext from the relay's point of view. The
//! `nonce` field is a replay canary distinct from the AEAD IV; sequencing
//! and freshness are enforced by the relay validator.

use serde::{Deserialize, Serialize};

use crate::b64;

/// Payload kind carried by a sealed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A text message.
    Text,
    /// One chunk of a file transfer.
    File,
}

impl MessageType {
    /// The wire name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

/// Per-recipient wrapped file key for envelope-mode file transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedFileKey {
    /// Recipient the wrap is addressed to.
    pub recipient_id: String,
    /// File key sealed under that recipient's session key.
    #[serde(with = "b64")]
    pub wrapped_key: Vec<u8>,
    /// IV used for the wrap.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
}

/// Metadata accompanying file-chunk messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Display name of the file.
    pub file_name: String,
    /// Total plaintext size in bytes.
    pub file_size: u64,
    /// Zero-based index of this chunk.
    pub chunk_index: u32,
    /// Total number of chunks.
    pub chunk_count: u32,
    /// Envelope-mode wrapped content keys, one per recipient.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wrapped_keys: Vec<WrappedFileKey>,
}

/// `POST /messages` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSubmission {
    /// Recipient identity.
    pub to: String,
    /// Completed session the message travels under.
    pub session_id: String,
    /// AES-256-GCM ciphertext with appended tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// 12-byte AEAD IV.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// Payload kind.
    pub message_type: MessageType,
    /// Sender-direction sequence number; must be exactly the previous
    /// accepted value plus one.
    pub sequence_number: u64,
    /// 32-byte replay canary, distinct from the AEAD IV.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Client clock at sealing time, epoch milliseconds.
    pub timestamp: u64,
    /// Present on file chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
}

/// `POST /messages` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAccepted {
    /// Relay-assigned message id.
    pub message_id: String,
    /// Relay clock at acceptance, epoch milliseconds.
    pub timestamp: u64,
}

/// One stored message, as returned by the conversation endpoint.
///
/// Immutable once stored; carries no plaintext or key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Relay-assigned message id.
    pub message_id: String,
    /// Sender identity.
    pub from: String,
    /// Recipient identity.
    pub to: String,
    /// Session the message travels under.
    pub session_id: String,
    /// Sealed payload.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// AEAD IV.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// Payload kind.
    pub message_type: MessageType,
    /// Validated sender-direction sequence number; receivers use it to
    /// enforce gap-free in-order delivery.
    pub sequence_number: u64,
    /// Relay clock at acceptance, epoch milliseconds.
    pub server_timestamp: u64,
    /// Present on file chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
}
