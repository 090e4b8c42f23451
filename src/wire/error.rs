// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Error kinds surfaced on the wire as an `ERROR`/`DaemonError` response.
///
/// Internal plumbing uses `anyhow::Result`; errors are only converted to a
/// `WireError` at the point a response frame is about to be written.
#[derive(Debug, Error, Clone)]
pub enum WireError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("already set")]
    AlreadySet,

    #[error("not found")]
    NotFound,

    #[error("not enabled")]
    NotEnabled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handler error: {0:?}")]
    HandlerError(Vec<u8>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WireError {
    /// Textual message as carried on the wire; opaque beyond the kind tags
    /// above.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Short tag identifying the error kind, stable across `Display` wording
    /// changes.
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::Malformed(_) => "MALFORMED",
            WireError::AlreadySet => "ALREADY_SET",
            WireError::NotFound => "NOT_FOUND",
            WireError::NotEnabled => "NOT_ENABLED",
            WireError::Transport(_) => "TRANSPORT",
            WireError::HandlerError(_) => "HANDLER_ERROR",
            WireError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<anyhow::Error> for WireError {
    fn from(err: anyhow::Error) -> Self {
        WireError::Internal(err.to_string())
    }
}
