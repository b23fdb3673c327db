// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    // Chain connection lost or RPC failure; recovered by reconnecting
    Transport(String),
    // Malformed or unexpected log; the offending log is skipped
    Decode(String),
    // Event store read/write failure; contained at the call site
    Persistence(String),
    // Analysis or attestation endpoint unavailable or erroring;
    // callers degrade to defaults, never crash
    ExternalCapability(String),
    // Missing keys/addresses; the feature stays disabled
    Configuration(String),
}

impl WatchError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            WatchError::Transport(_) => "transport",
            WatchError::Decode(_) => "decode",
            WatchError::Persistence(_) => "persistence",
            WatchError::ExternalCapability(_) => "external_capability",
            WatchError::Configuration(_) => "configuration",
        }
    }
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Transport(msg) => write!(f, "transport error: {}", msg),
            WatchError::Decode(msg) => write!(f, "decode error: {}", msg),
            WatchError::Persistence(msg) => write!(f, "persistence error: {}", msg),
            WatchError::ExternalCapability(msg) => write!(f, "external capability error: {}", msg),
            WatchError::Configuration(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for WatchError {}

pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels() {
        let errors = vec![
            (WatchError::Transport("x".to_string()), "transport"),
            (WatchError::Decode("x".to_string()), "decode"),
            (WatchError::Persistence("x".to_string()), "persistence"),
            (
                WatchError::ExternalCapability("x".to_string()),
                "external_capability",
            ),
            (WatchError::Configuration("x".to_string()), "configuration"),
        ];
        for (error, expected) in errors {
            assert_eq!(error.error_type(), expected);
        }
    }

    /// error_type values are used as Prometheus label values and must stay
    /// lowercase/underscore only
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors = vec![
            WatchError::Transport("t".to_string()),
            WatchError::Decode("d".to_string()),
            WatchError::Persistence("p".to_string()),
            WatchError::ExternalCapability("e".to_string()),
            WatchError::Configuration("c".to_string()),
        ];
        for error in errors {
            let label = error.error_type();
            assert!(!label.is_empty());
            for c in label.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "label '{}' contains invalid character '{}'",
                    label,
                    c
                );
            }
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }

    #[test]
    fn test_error_type_payload_independence() {
        let err1 = WatchError::Transport("short".to_string());
        let err2 = WatchError::Transport("a much longer transport error message".to_string());
        assert_eq!(err1.error_type(), err2.error_type());
    }

    #[test]
    fn test_display_includes_message() {
        let err = WatchError::Decode("bad topic".to_string());
        let display = format!("{}", err);
        assert!(display.contains("decode"));
        assert!(display.contains("bad topic"));
    }
}
