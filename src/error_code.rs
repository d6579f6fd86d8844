//! Client-visible S3 error codes.
//!
//! Every failure path inside an Action resolves to at most one of these
//! codes. Codes reported by the auth client are kept verbatim, unknown ones
//! land in [`ErrorCode::Other`].

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoSuchBucket,
    NoSuchKey,
    BucketAlreadyExists,
    BucketNotEmpty,
    AccessDenied,
    InvalidAccessKeyId,
    SignatureDoesNotMatch,
    InvalidAccountForMgmtApi,
    InternalError,
    ServiceUnavailable,
    RequestTimeout,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NoSuchBucket => "NoSuchBucket",
            ErrorCode::NoSuchKey => "NoSuchKey",
            ErrorCode::BucketAlreadyExists => "BucketAlreadyExists",
            ErrorCode::BucketNotEmpty => "BucketNotEmpty",
            ErrorCode::AccessDenied => "AccessDenied",
            ErrorCode::InvalidAccessKeyId => "InvalidAccessKeyId",
            ErrorCode::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            ErrorCode::InvalidAccountForMgmtApi => "InvalidAccountForMgmtApi",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ServiceUnavailable => "ServiceUnavailable",
            ErrorCode::RequestTimeout => "RequestTimeout",
            ErrorCode::Other(code) => code,
        }
    }

    /// HTTP status the front end sends for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NoSuchBucket | ErrorCode::NoSuchKey => 404,
            ErrorCode::BucketAlreadyExists | ErrorCode::BucketNotEmpty => 409,
            ErrorCode::AccessDenied
            | ErrorCode::InvalidAccessKeyId
            | ErrorCode::SignatureDoesNotMatch
            | ErrorCode::InvalidAccountForMgmtApi => 403,
            ErrorCode::RequestTimeout => 400,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::InternalError | ErrorCode::Other(_) => 500,
        }
    }

    /// Whether the response must carry a Retry-After header.
    pub fn wants_retry_after(&self) -> bool {
        matches!(self, ErrorCode::ServiceUnavailable)
    }
}

impl FromStr for ErrorCode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NoSuchBucket" => ErrorCode::NoSuchBucket,
            "NoSuchKey" => ErrorCode::NoSuchKey,
            "BucketAlreadyExists" => ErrorCode::BucketAlreadyExists,
            "BucketNotEmpty" => ErrorCode::BucketNotEmpty,
            "AccessDenied" => ErrorCode::AccessDenied,
            "InvalidAccessKeyId" => ErrorCode::InvalidAccessKeyId,
            "SignatureDoesNotMatch" => ErrorCode::SignatureDoesNotMatch,
            "InvalidAccountForMgmtApi" => ErrorCode::InvalidAccountForMgmtApi,
            "InternalError" => ErrorCode::InternalError,
            "ServiceUnavailable" => ErrorCode::ServiceUnavailable,
            "RequestTimeout" => ErrorCode::RequestTimeout,
            other => ErrorCode::Other(other.to_string()),
        })
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(code) => code,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip_through_strings() {
        for code in [
            ErrorCode::NoSuchBucket,
            ErrorCode::BucketNotEmpty,
            ErrorCode::InvalidAccountForMgmtApi,
            ErrorCode::ServiceUnavailable,
            ErrorCode::RequestTimeout,
        ] {
            assert_eq!(ErrorCode::from(code.as_str()), code);
        }
    }

    #[test]
    fn test_unknown_code_is_kept_verbatim() {
        let code = ErrorCode::from("ExpiredToken");
        assert_eq!(code, ErrorCode::Other("ExpiredToken".to_string()));
        assert_eq!(code.to_string(), "ExpiredToken");
        assert_eq!(code.http_status(), 500);
    }

    #[test]
    fn test_statuses() {
        assert_eq!(ErrorCode::NoSuchBucket.http_status(), 404);
        assert_eq!(ErrorCode::BucketAlreadyExists.http_status(), 409);
        assert_eq!(ErrorCode::SignatureDoesNotMatch.http_status(), 403);
        assert_eq!(ErrorCode::ServiceUnavailable.http_status(), 503);
        assert!(ErrorCode::ServiceUnavailable.wants_retry_after());
        assert!(!ErrorCode::InternalError.wants_retry_after());
    }
}
