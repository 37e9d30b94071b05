//! procore-capture command-line driver: REST crawls, browser-driven grid
//! scans, and a stdio command server.

#[cfg(feature = "chromium")]
pub mod browser;
pub mod commands;
pub mod stdio;

pub use stdio::StdioServer;
