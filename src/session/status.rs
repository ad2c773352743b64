use crate::error::{Error, ErrorInfo, Result};
use tracing::debug;

/// Outcome of the last operation, and whether failures are returned as
/// errors or only recorded.
#[derive(Debug)]
pub struct Status {
    last: ErrorInfo,
    raise_errors: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            last: ErrorInfo::ok(),
            raise_errors: true,
        }
    }
}

impl Status {
    pub fn last(&self) -> &ErrorInfo {
        &self.last
    }

    pub fn raise_errors(&self) -> bool {
        self.raise_errors
    }

    pub fn set_raise_errors(&mut self, raise: bool) {
        self.raise_errors = raise;
    }

    /// Record `result` as the last outcome. With errors switched off a
    /// failure is only recorded and the caller gets `T::default()`; a
    /// closed session always fails.
    pub fn settle<T: Default>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.last = ErrorInfo::ok();
                Ok(value)
            }
            Err(err) => {
                self.last = err.info();
                debug!(code = ?self.last.code, error = %err, "operation failed");
                if self.raise_errors || matches!(err, Error::SessionClosed) {
                    Err(err)
                } else {
                    Ok(T::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn records_and_raises_by_default() {
        let mut status = Status::default();
        let out: Result<usize> = status.settle(Err(Error::NoMatch { path: "/a".into() }));
        assert!(out.is_err());
        assert_eq!(status.last().code, ErrorCode::NoMatch);

        let out = status.settle(Ok(3usize));
        assert_eq!(out.unwrap(), 3);
        assert_eq!(status.last().code, ErrorCode::NoError);
    }

    #[test]
    fn quiet_mode_returns_default() {
        let mut status = Status::default();
        status.set_raise_errors(false);
        let out: Result<Option<String>> =
            status.settle(Err(Error::BadArgument("nope".into())));
        assert_eq!(out.unwrap(), None);
        assert_eq!(status.last().code, ErrorCode::BadArgument);

        let closed: Result<()> = status.settle(Err(Error::SessionClosed));
        assert!(closed.is_err());
    }
}
