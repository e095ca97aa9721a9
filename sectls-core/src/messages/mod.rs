//! Handshake message bodies.
//!
//! Every type here reads and writes the body alone. Framing with the type
//! byte and 24-bit length lives in [`crate::codec`], so a body can be hashed
//! into the transcript exactly as it went over the wire.
//!
//! | Message              | Sender | Protection            |
//! |----------------------|--------|-----------------------|
//! | ClientHello          | client | plaintext             |
//! | ServerHello / HRR    | server | plaintext             |
//! | EncryptedExtensions  | server | handshake keys        |
//! | CertificateRequest   | server | handshake/application |
//! | Certificate          | both   | handshake/application |
//! | CertificateVerify    | both   | handshake/application |
//! | Finished             | both   | handshake/application |
//! | EndOfEarlyData       | client | early keys            |
//! | NewSessionTicket     | server | application keys      |
//! | KeyUpdate            | both   | application keys      |

// Hellos
pub mod client_hello;
pub mod hello_retry_request;
pub mod server_hello;

// Server parameters
pub mod certificate_request;
pub mod encrypted_extensions;

// Authentication
pub mod certificate;
pub mod certificate_verify;
pub mod finished;

// After the hellos
pub mod end_of_early_data;
pub mod key_update;
pub mod new_session_ticket;

pub use certificate::{Certificate, CertificateEntry};
pub use certificate_request::CertificateRequest;
pub use certificate_verify::CertificateVerify;
pub use client_hello::ClientHello;
pub use encrypted_extensions::EncryptedExtensions;
pub use end_of_early_data::EndOfEarlyData;
pub use finished::Finished;
pub use hello_retry_request::HelloRetryRequest;
pub use key_update::{KeyUpdate, KeyUpdateRequest};
pub use new_session_ticket::NewSessionTicket;
pub use server_hello::ServerHello;
