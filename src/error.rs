// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the session layer.
//!
//! Configuration problems are reported synchronously at construction time.
//! Transport failures surface from `start` and the request methods. Negative
//! broker acknowledgements are not errors here: they are logged and left
//! observable through `is_active`/`is_connected`, and blocking waits always
//! degrade to a returned `bool` on timeout.

use thiserror::Error;

use crate::transport::ConnectCode;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error in the supplied connection configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error raised by the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A quality-of-service level outside 0-2 was supplied.
    #[error("invalid QoS level: {0}")]
    InvalidQos(u8),
}

/// Errors detected while validating connection configuration.
///
/// These are fatal to client construction and are never raised after
/// `start` has been called.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The protocol version string did not match any known alias.
    #[error("unknown protocol version '{0}', valid versions are: 3.1.0, 3.1.1, 5.0.0")]
    UnknownProtocolVersion(String),

    /// No broker host was supplied.
    #[error("broker host is required")]
    MissingHost,
}

/// Errors raised by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The MQTT client rejected a request locally.
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused the connection.
    #[error("connection refused by broker: {0}")]
    ConnectionRefused(ConnectCode),

    /// An operation required a connection that is not established.
    #[error("transport is not connected")]
    NotConnected,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
