//! # streamkit-server: rendering stream server
//!
//! Renders a test pattern, captures it through the GPU frame capturer,
//! and streams it to every viewer that connects over the signaling relay.
//!
//! ## Components
//!
//! - **config**: TOML configuration (`[signaling]`, `[conductor]`,
//!   `[capture]`, `[demo]`, `[logging]`).
//! - **service**: the render loop and conductor lifecycle.
//! - **session**: preview peer sessions and their JSON signaling.
//! - **renderer**: the synthetic scene.

pub mod config;
pub mod renderer;
pub mod service;
pub mod session;
