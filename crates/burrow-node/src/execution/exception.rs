use std::fmt;

/// Stable error codes for failed transaction execution.
///
/// The numeric values end up in logs and responses compared across validators and must never be
/// renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Generic = 1,
    InsufficientBalance = 2,
    InvalidSequence = 3,
    UnknownAddress = 4,
    DuplicateAddress = 5,
    InsufficientPower = 6,
    PermissionDenied = 7,
    Overflow = 8,
}

impl ErrorCode {
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn info(self) -> &'static str {
        match self {
            Self::Generic => "generic error",
            Self::InsufficientBalance => "insufficient balance",
            Self::InvalidSequence => "invalid sequence number",
            Self::UnknownAddress => "unknown address",
            Self::DuplicateAddress => "address already exists",
            Self::InsufficientPower => "insufficient validator power",
            Self::PermissionDenied => "permission denied",
            Self::Overflow => "arithmetic overflow",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.value(), self.info())
    }
}

/// A structured failure of transaction execution.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("error {code}: {message}")]
pub struct Exception {
    code: ErrorCode,
    message: String,
}

impl Exception {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classifies `error` as an exception.
    ///
    /// Returns the exception at the top of the chain if there is one, otherwise the first
    /// exception found among its sources, otherwise wraps the whole report as
    /// [`ErrorCode::Generic`].
    #[must_use]
    pub fn from_report(error: &eyre::Report) -> Self {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<Exception>())
            .cloned()
            .unwrap_or_else(|| Self::new(ErrorCode::Generic, format!("{error:#}")))
    }
}

#[cfg(test)]
mod tests {
    use eyre::WrapErr as _;

    use super::*;

    #[test]
    fn exception_is_recovered_through_context() {
        let exception = Exception::new(ErrorCode::InsufficientBalance, "alice has 0");
        let report = Err::<(), _>(exception.clone())
            .wrap_err("failed executing send")
            .unwrap_err();
        assert_eq!(Exception::from_report(&report), exception);
    }

    #[test]
    fn untyped_errors_become_generic() {
        let report = eyre::eyre!("storage exploded");
        let exception = Exception::from_report(&report);
        assert_eq!(exception.code(), ErrorCode::Generic);
        assert!(exception.message().contains("storage exploded"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Generic.value(), 1);
        assert_eq!(ErrorCode::InsufficientBalance.value(), 2);
        assert_eq!(ErrorCode::InvalidSequence.value(), 3);
        assert_eq!(ErrorCode::UnknownAddress.value(), 4);
        assert_eq!(ErrorCode::DuplicateAddress.value(), 5);
        assert_eq!(ErrorCode::InsufficientPower.value(), 6);
        assert_eq!(ErrorCode::PermissionDenied.value(), 7);
        assert_eq!(ErrorCode::Overflow.value(), 8);
    }
}
