//! Wicket - minimal HTTP/1.1 static site server
//!
//! Core library for request framing, response writing and connection handling.

pub mod config;
pub mod http;
pub mod server;
pub mod site;
