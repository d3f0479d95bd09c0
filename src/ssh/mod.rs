//! SSH module - handles the transport beneath the SFTP facade
//!
//! This module provides the SSH functionality using the russh library.
//!
//! # Features
//! - Password and public key authentication (inline or `file://` keys)
//! - Host key verification via known_hosts, with a configurable trust policy

pub mod auth;
mod client;
mod config;
mod error;
pub mod known_hosts;

pub use auth::{Credentials, KeyError, KeySource};
pub use client::{resolve, ClientHandler, SshClient};
pub use config::{HostKeyPolicy, SftpParameters, FILE_PROTOCOL};
pub use error::SshError;
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
