//! Webscout browser layer
//!
//! Owns the browser process (or attaches to an already-running debugging
//! endpoint), speaks the Chrome DevTools Protocol over WebSocket, and exposes
//! a [`Page`] driver with a typed event stream for evidence collection.

pub mod client;
pub mod error;
pub mod launcher;
pub mod page;
pub mod protocol;

pub use client::CdpClient;
pub use error::{CdpError, CdpResult};
pub use launcher::{ChromeConfig, ChromeHandle};
pub use page::{CdpCookie, Page, PageEvent};
