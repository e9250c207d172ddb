//! Error classification shared by all polres crates.

/// errno-like class of an error, stable across crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Something with that name already exists (`EEXIST`)
    Exists,
    /// Name or id could not be resolved (`ENOENT`)
    NotFound,
    /// Cyclic dependency (`ELOOP`)
    Loop,
    /// Invalid argument or type mismatch (`EINVAL`)
    Invalid,
    /// No room to store the value, e.g. no open frame (`ENOSPC`)
    NoSpace,
    /// Operation failed at runtime
    Failed,
}

impl ErrorClass {
    /// Conventional errno name.
    pub fn errno_name(&self) -> &'static str {
        match self {
            ErrorClass::Exists => "EEXIST",
            ErrorClass::NotFound => "ENOENT",
            ErrorClass::Loop => "ELOOP",
            ErrorClass::Invalid => "EINVAL",
            ErrorClass::NoSpace => "ENOSPC",
            ErrorClass::Failed => "EIO",
        }
    }
}

/// Errors that can be classified.
pub trait Classify {
    /// The errno-like class of this error.
    fn class(&self) -> ErrorClass;
}
