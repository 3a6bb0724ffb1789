//! Link constants.
//!
//! The wire values here are shared with every peer implementation and MUST NOT
//! be changed independently on one side.

use uuid::Uuid;

// =============================================================================
// SERVICE ROUTING
// =============================================================================

/// Service identifier both peers register their channel under.
///
/// The transport routes an incoming connection to the listener whose service
/// identifier matches exactly.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Human-readable service record name used when listening.
pub const SERVICE_NAME: &str = "chat_service";

// =============================================================================
// FRAMING
// =============================================================================

/// Separator between message body and sender label (U+241F, SYMBOL FOR UNIT
/// SEPARATOR).
pub const FRAME_DELIMITER: char = '\u{241F}';

/// UTF-8 encoding of [`FRAME_DELIMITER`].
pub const FRAME_DELIMITER_BYTES: &[u8] = &[0xE2, 0x90, 0x9F];

/// Receive buffer size; one read yields at most this many bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

// =============================================================================
// USER-VISIBLE TEXT
// =============================================================================

/// Sender label used when the adapter reports no local name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Failure reason for a connect attempt that hit an I/O error.
pub const REASON_CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// Failure reason when a peer address cannot be resolved to a channel.
pub const REASON_PEER_UNAVAILABLE: &str = "Peer is unavailable";

/// Failure reason when the listening channel cannot be opened.
pub const REASON_LISTEN_FAILED: &str = "Could not open listening channel";

/// Error-channel text for connectivity changes from peers that are not bonded.
pub const ERROR_NON_PAIRED_PEER: &str = "Can't connect to a non-paired device.";
