//! Storage infrastructure: everything that touches the file system.
//!
//! - **`keystore`** – the CURVE key pair directory (load, or generate and
//!   persist on first use).
//! - **`config`** – the TOML configuration file read by the binary.

pub mod config;
pub mod keystore;
