use failure::{Context, Error as FailureError, Fail};
use validator::ValidationErrors;

/// Error kinds attached as context to errors leaving repos, services and the tenant resolver
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Not found")]
    NotFound,
    #[fail(display = "Parse error")]
    Parse,
    #[fail(display = "Validation error")]
    Validate(ValidationErrors),
    #[fail(display = "Server is refusing to fullfil the request")]
    Forbidden,
    #[fail(display = "R2D2 connection error")]
    Connection,
    #[fail(display = "Store not found")]
    StoreNotFound,
    #[fail(display = "Store database is not provisioned")]
    StoreNotProvisioned,
    #[fail(display = "Store database credentials could not be decrypted")]
    CredentialDecryptionFailed,
    #[fail(display = "Timed out waiting for a store database connection")]
    ConnectionTimeout,
}

impl Error {
    /// Whether the failed operation may succeed if attempted again later
    pub fn is_retryable(&self) -> bool {
        match *self {
            Error::Connection | Error::StoreNotProvisioned | Error::ConnectionTimeout => true,
            _ => false,
        }
    }
}

/// Finds the outermost error kind in the chain of `err`
pub fn error_kind(err: &FailureError) -> Option<&Error> {
    err.iter_chain()
        .filter_map(|cause| {
            cause
                .downcast_ref::<Context<Error>>()
                .map(|context| context.get_context())
                .or_else(|| cause.downcast_ref::<Error>())
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_kind_below_string_context() {
        let err: FailureError = format_err!("Store acme is not registered").context(Error::StoreNotFound).into();
        let err: FailureError = err.context("Resolve store acme error occurred.").into();

        match error_kind(&err) {
            Some(Error::StoreNotFound) => {}
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = format_err!("boom");
        assert!(error_kind(&err).is_none());
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::StoreNotProvisioned.is_retryable());
        assert!(Error::ConnectionTimeout.is_retryable());
        assert!(!Error::CredentialDecryptionFailed.is_retryable());
        assert!(!Error::StoreNotFound.is_retryable());
    }
}
