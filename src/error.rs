//! Error types for the audiohub daemon.
//!
//! Defines the error codes used across the pipeline so that HTTP handlers,
//! the job runner and the derivers agree on what a failure means.

use std::fmt;

/// Error codes carried by every [`DaemonError`].
///
/// The HTTP layer maps each code to a status; the job runner uses
/// [`ErrorCode::is_retryable`] to decide whether a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Source bytes or a derivable artifact cannot be located or produced.
    /// Trigger: unknown track id, every resolution strategy missed.
    NotFound,

    /// An external encoder or extractor is missing or exited with an error.
    /// Trigger: ffmpeg/audiowaveform not installed, unreadable input.
    ToolUnavailable,

    /// Malformed or out-of-bounds byte range.
    /// Trigger: `Range` header outside `0 <= A <= B < size`.
    RangeNotSatisfiable,

    /// Upload body is missing the audio part or it is not audio.
    /// Trigger: multipart without `audio` field, non-audio content type.
    InvalidUpload,

    /// The derivation job queue is at capacity.
    /// Trigger: more pending jobs than `queue_capacity`.
    QueueFull,

    /// Unexpected I/O or serialization failure.
    Internal,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ToolUnavailable => "TOOL_UNAVAILABLE",
            ErrorCode::RangeNotSatisfiable => "RANGE_NOT_SATISFIABLE",
            ErrorCode::InvalidUpload => "INVALID_UPLOAD",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Returns the HTTP status code this error is surfaced as.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::RangeNotSatisfiable => 416,
            ErrorCode::InvalidUpload => 400,
            ErrorCode::QueueFull => 503,
            ErrorCode::ToolUnavailable | ErrorCode::Internal => 500,
        }
    }

    /// Returns true if a background job failing with this code may be retried.
    ///
    /// Missing sources and missing tools do not fix themselves between attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Internal)
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => {
                "Check that the track exists and its audio file is present under the media root"
            }
            ErrorCode::ToolUnavailable => {
                "Install ffmpeg and audiowaveform, or point AUDIOHUB_FFMPEG / \
                 AUDIOHUB_AUDIOWAVEFORM at the binaries"
            }
            ErrorCode::RangeNotSatisfiable => {
                "Request a single range of the form bytes=A-B within the file size"
            }
            ErrorCode::InvalidUpload => {
                "Send a multipart body with an `audio` file part (audio/* content type)"
            }
            ErrorCode::QueueFull => {
                "Wait for pending derivations to finish or raise AUDIOHUB_QUEUE_CAPACITY"
            }
            ErrorCode::Internal => "Check the daemon logs and free disk space under the media root",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Size of the resource a rejected range was checked against.
    pub range_size: Option<u64>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            range_size: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
            range_size: None,
        }
    }

    /// Creates a NOT_FOUND error for an unknown track id.
    pub fn track_not_found(track_id: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("Track not found: {}", track_id))
    }

    /// Creates a NOT_FOUND error for a track whose audio bytes cannot be located.
    pub fn source_not_found(track_id: &str) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("No readable audio for track {}", track_id),
        )
    }

    /// Creates a TOOL_UNAVAILABLE error.
    pub fn tool_unavailable(tool: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ToolUnavailable,
            format!("{} unavailable: {}", tool, reason.into()),
        )
    }

    /// Creates a RANGE_NOT_SATISFIABLE error.
    pub fn range_not_satisfiable(header: &str, size: u64) -> Self {
        Self {
            range_size: Some(size),
            ..Self::new(
                ErrorCode::RangeNotSatisfiable,
                format!("Range {:?} not satisfiable for {} bytes", header, size),
            )
        }
    }

    /// Creates an INVALID_UPLOAD error.
    pub fn invalid_upload(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUpload, reason.into())
    }

    /// Creates a QUEUE_FULL error.
    pub fn queue_full(capacity: usize) -> Self {
        Self::new(
            ErrorCode::QueueFull,
            format!("Derivation queue is full (capacity {})", capacity),
        )
    }

    /// Creates an INTERNAL error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, reason.into())
    }

    /// Creates an INTERNAL error wrapping an I/O failure.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        Self::with_source(
            ErrorCode::Internal,
            format!("{}: {}", context, source),
            source,
        )
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
