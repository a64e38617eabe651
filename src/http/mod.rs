//! HTTP/1.x framing and response writing.
//!
//! # Architecture
//!
//! - **`span`**: zero-copy views into the receive buffer and a line scanner over them
//! - **`headers`**: ordered, case-insensitive header map (last value wins)
//! - **`parser`**: the incremental request framer
//! - **`request`**: the framed request handed to the handler
//! - **`response`**: status codes and whole-response values
//! - **`writer`**: serializes responses onto the connection
//! - **`pages`**: fixed HTML bodies for errors and redirects
//! - **`mime`**: the content-type allow-list for served files
//! - **`connection`**: the per-connection receive/dispatch loop
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Feed bytes to the framer until Ready or Error
//!        └──────┬──────┘
//!               │
//!       ┌───────┴──────────┐
//!       ▼                  ▼
//! ┌─────────────┐   ┌─────────────┐
//! │ Dispatching │   │  Rejecting  │ ← 400 / 408, then close
//! └──────┬──────┘   └──────┬──────┘
//!        │ Response flushed │
//!        ├─ Keep-Alive → Reading (leftover bytes carried over)
//!        └─ Close → Closed ◀┘
//! ```

pub mod span;
pub mod headers;
pub mod request;
pub mod response;
pub mod parser;
pub mod connection;
pub mod writer;
pub mod pages;
pub mod mime;
