//! mdlive wire protocol
//!
//! JSON text frames exchanged over a live connection.
//!
//! ## Inbound
//! ```text
//! {"type": "parse" | "parse_incremental" | "subscribe" | "unsubscribe",
//!  "documentId"?, "content"?, "blockId"?, "timestamp"?, "data"?}
//! ```
//!
//! ## Outbound
//! ```text
//! {"type": "connected" | "parsed" | "parsed_incremental" | "subscribed"
//!          | "unsubscribed" | "error",
//!  "success": bool, "data"?, "error"?, "timestamp": <unix millis>}
//! ```

pub mod error;
pub mod message;
pub mod response;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{Envelope, Request};
pub use response::{ResponseKind, ServerResponse};
