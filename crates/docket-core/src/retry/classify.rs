//! Classify service errors into retry policy error kinds.

use super::error::ServiceError;
use super::policy::ErrorKind;

/// Classify a service error for retry decisions.
pub fn classify(e: &ServiceError) -> ErrorKind {
    match e {
        ServiceError::RateLimited { .. } => ErrorKind::RateLimited,
        ServiceError::Transient(_) => ErrorKind::Transient,
        ServiceError::Permanent(_) => ErrorKind::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_its_own_kind() {
        let e = ServiceError::RateLimited { retry_after: None };
        assert_eq!(classify(&e), ErrorKind::RateLimited);
        assert!(classify(&e).is_transient());
    }

    #[test]
    fn permanent_is_not_transient() {
        let e = ServiceError::Permanent("bad page image".into());
        assert_eq!(classify(&e), ErrorKind::Permanent);
        assert!(!classify(&e).is_transient());
        assert!(classify(&ServiceError::Transient("reset".into())).is_transient());
    }
}
