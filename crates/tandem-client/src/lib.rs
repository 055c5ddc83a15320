//! # Tandem Client
//!
//! Session layer of Tandem: joins a document on the multiplayer server over a
//! [`ReconnectingSocket`](tandem_transport::ReconnectingSocket) and keeps a
//! local [`Store`](tandem_core::Store) in step with it.
//!
//! ```text
//! ┌────────────┐  payloads  ┌────────────┐  actions  ┌─────────┐
//! │  Socket    │ ─────────▶ │ Dispatcher │ ────────▶ │  Store  │
//! │ (reconnect)│ ◀───────── │            │           │         │
//! └────────────┘   sends    └────────────┘           └─────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use tandem_client::{Session, SessionOptions};
//! use tandem_core::Store;
//!
//! let options = SessionOptions::new("wss://example.com/ws/doc-1/token", "doc-1", "user-1");
//! let session = Session::connect(options, Store::new())?;
//! session.dispatcher().set_cursor(tandem_protocol::Cursor::new(10.0, 20.0))?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod rest;
pub mod session;

pub use config::ClientConfig;
pub use dispatcher::{Callbacks, Dispatcher, WireFormat};
pub use rest::{RestClient, RestError};
pub use session::{connection_url, Session, SessionOptions};
