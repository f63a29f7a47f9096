//! Compound reservation handles.

use std::fmt;

/// Client-facing reservation identifier.
///
/// Paired budgets hand out a `token_handle:request_handle` compound; single
/// budgets a bare id. The compound string is the only form clients store;
/// it is split back into halves solely when building report/release
/// payloads. A missing half is benign on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub token: String,
    pub rate: Option<String>,
}

impl LeaseHandle {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            token: id.into(),
            rate: None,
        }
    }

    pub fn paired(token: impl Into<String>, rate: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            rate: Some(rate.into()),
        }
    }

    /// Parse a wire handle. `"tok:rate"` splits on the first colon; a bare
    /// id or an empty rate half yields a single-budget handle.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((token, rate)) if !rate.is_empty() => Self::paired(token, rate),
            Some((token, _)) => Self::single(token),
            None => Self::single(raw),
        }
    }

    /// The wire form the client stores and returns.
    pub fn compound(&self) -> String {
        match &self.rate {
            Some(rate) => format!("{}:{}", self.token, rate),
            None => self.token.clone(),
        }
    }
}

impl fmt::Display for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_round_trips() {
        let handle = LeaseHandle::paired("tok-1", "rate-1");
        assert_eq!(handle.compound(), "tok-1:rate-1");
        assert_eq!(LeaseHandle::parse("tok-1:rate-1"), handle);
    }

    #[test]
    fn bare_id_parses_as_single() {
        let handle = LeaseHandle::parse("tok-1");
        assert_eq!(handle.token, "tok-1");
        assert!(handle.rate.is_none());
    }

    #[test]
    fn empty_rate_half_is_dropped() {
        let handle = LeaseHandle::parse("tok-1:");
        assert_eq!(handle.token, "tok-1");
        assert!(handle.rate.is_none());
    }

    #[test]
    fn rate_half_may_contain_colons() {
        let handle = LeaseHandle::parse("a:b:c");
        assert_eq!(handle.token, "a");
        assert_eq!(handle.rate.as_deref(), Some("b:c"));
    }
}
