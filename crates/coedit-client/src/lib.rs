//! Coedit client session
//!
//! Owns one WebSocket transport, the set of joined documents with their
//! pending-operation buffers, and reconnection state. Local edits apply
//! optimistically and ship to the coordinator; inbound remote operations
//! are transformed against the pending buffer before applying.
//!
//! ```no_run
//! use coedit_client::{CollabSession, SessionConfig};
//! use coedit_common::DocumentId;
//! use coedit_protocol::DocumentSchema;
//! use coedit_types::SharedDoc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = CollabSession::new(SessionConfig::new("ws://localhost:8080/ws"));
//! session.connect().await?;
//!
//! let doc = session
//!     .open_document(DocumentId::parse("notes")?, DocumentSchema::Text)
//!     .await?;
//! doc.update(|doc| match doc {
//!     SharedDoc::Text(text) => text.insert(0, "hello").map(|_| ()),
//!     _ => Ok(()),
//! })?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod document;
mod error;
mod session;

pub use config::{ReconnectionConfig, SessionConfig};
pub use document::DocumentHandle;
pub use error::ClientError;
pub use session::{CollabSession, ConnectionState, SessionEvent};
