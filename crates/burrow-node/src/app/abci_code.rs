use std::fmt;

use tendermint::abci::Code;

/// Status codes returned in ABCI responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbciCode(u32);

#[rustfmt::skip]
impl AbciCode {
    pub const OK: Self = Self(0);
    pub const UNSUPPORTED_REQUEST: Self = Self(400);
    pub const PEER_FORBIDDEN: Self = Self(403);
    pub const ENCODING_ERROR: Self = Self(500);
    pub const TX_EXECUTION_ERROR: Self = Self(501);
    pub const COMMIT_ERROR: Self = Self(502);
}

impl AbciCode {
    pub const PEER_AUTHORIZED: Self = Self::OK;

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn info(self) -> String {
        match self {
            Self::OK => "success".into(),
            Self::UNSUPPORTED_REQUEST => "the request is not supported".into(),
            Self::PEER_FORBIDDEN => "the peer is not authorized".into(),
            Self::ENCODING_ERROR => "failed encoding or decoding data".into(),
            Self::TX_EXECUTION_ERROR => "the transaction failed to execute".into(),
            Self::COMMIT_ERROR => "failed to commit the block".into(),
            Self(other) => format!("unknown code {other}"),
        }
    }
}

impl fmt::Display for AbciCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0, self.info())
    }
}

impl From<AbciCode> for Code {
    fn from(code: AbciCode) -> Self {
        Code::from(code.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_maps_to_tendermint_ok() {
        assert!(Code::from(AbciCode::OK).is_ok());
        assert!(Code::from(AbciCode::PEER_AUTHORIZED).is_ok());
        assert_eq!(Code::from(AbciCode::ENCODING_ERROR).value(), 500);
    }

    #[test]
    fn error_codes_have_distinct_values() {
        let codes = [
            AbciCode::OK,
            AbciCode::UNSUPPORTED_REQUEST,
            AbciCode::PEER_FORBIDDEN,
            AbciCode::ENCODING_ERROR,
            AbciCode::TX_EXECUTION_ERROR,
            AbciCode::COMMIT_ERROR,
        ];
        let values: std::collections::BTreeSet<_> = codes.iter().map(|c| c.value()).collect();
        assert_eq!(values.len(), codes.len());
        for code in codes {
            assert!(!code.info().starts_with("unknown"));
        }
    }
}
