use reqwest::StatusCode;
use std::fmt;

const BODY_PREVIEW_CHARS: usize = 512;

/// Why a quote fetch produced no data. An empty result is not an error: the
/// provider answers unknown symbols with an empty list.
#[derive(Debug)]
pub enum FetchError {
    Transport(reqwest::Error),
    Status { status: StatusCode, body: String },
    Decode { detail: String, body: String },
    Api { message: String },
    InvalidSymbol { symbol: String },
}

impl FetchError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "http_status",
            Self::Decode { .. } => "decode",
            Self::Api { .. } => "api",
            Self::InvalidSymbol { .. } => "invalid_symbol",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => !err.is_builder(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Decode { .. } | Self::Api { .. } | Self::InvalidSymbol { .. } => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "quote fetch failed (transport): {err}"),
            Self::Status { status, body } => write!(
                f,
                "quote fetch failed (http_status): HTTP {status}: {}",
                preview(body)
            ),
            Self::Decode { detail, body } => write!(
                f,
                "quote fetch failed (decode): {detail}: {}",
                preview(body)
            ),
            Self::Api { message } => write!(f, "quote fetch failed (api): {message}"),
            Self::InvalidSymbol { symbol } => {
                write!(f, "quote fetch failed (invalid_symbol): {symbol:?} is not a ticker")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

fn preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(BODY_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let throttled = FetchError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        let unavailable = FetchError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        let forbidden = FetchError::Status {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!FetchError::Api {
            message: "Invalid API KEY".into()
        }
        .is_retryable());
        assert!(!FetchError::InvalidSymbol {
            symbol: "..".into()
        }
        .is_retryable());
    }

    #[test]
    fn display_names_the_category_and_truncates_bodies() {
        let err = FetchError::Decode {
            detail: "expected a JSON array".into(),
            body: "x".repeat(2_000),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("quote fetch failed (decode): expected a JSON array"));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < 700);
    }
}
