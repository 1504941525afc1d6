//! # Typed Index Errors
//!
//! Operations return [`eyre::Result`] throughout; the variants below are the
//! typed failures that form part of the index contract. They travel inside
//! the [`eyre::Report`] and can be recovered with `downcast_ref`:
//!
//! ```ignore
//! match index.insert(key, value) {
//!     Ok(()) => {}
//!     Err(err) if err.downcast_ref::<IndexError>() == Some(&IndexError::KeyExists) => {
//!         // duplicate key
//!     }
//!     Err(err) => return Err(err),
//! }
//! ```
//!
//! Anything else carried by a report (cache I/O failures, malformed
//! arguments) is advisory context rather than contract.

use thiserror::Error;

/// Contract errors reported by the index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// An insert found the key already present. The stored value is
    /// unchanged.
    #[error("key is already present in the index")]
    KeyExists,

    /// An update addressed a key that is not in the index.
    #[error("key was not found in the index")]
    KeyNotFound,

    /// The free list is exhausted; no unallocated blocks remain.
    #[error("out of blocks: the free list is empty")]
    NoSpace,

    /// The operation is not supported by this index version.
    #[error("operation is not implemented")]
    Unimplemented,

    /// A structural invariant does not hold. The tree must be treated as
    /// corrupt; retrying will not help.
    #[error("index structure is corrupt: {0}")]
    Corrupt(String),
}

/// True when a report carries [`IndexError::NoSpace`].
pub(crate) fn is_no_space(err: &eyre::Report) -> bool {
    matches!(err.downcast_ref::<IndexError>(), Some(IndexError::NoSpace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_space_is_detected_through_a_report() {
        let report = eyre::Report::new(IndexError::NoSpace);
        assert!(is_no_space(&report));
    }

    #[test]
    fn other_errors_are_not_no_space() {
        let report = eyre::Report::new(IndexError::KeyExists);
        assert!(!is_no_space(&report));

        let adhoc = eyre::eyre!("cache failure");
        assert!(!is_no_space(&adhoc));
    }

    #[test]
    fn corrupt_formats_its_detail() {
        let err = IndexError::Corrupt("double free of block 7".into());
        assert_eq!(
            err.to_string(),
            "index structure is corrupt: double free of block 7"
        );
    }
}
