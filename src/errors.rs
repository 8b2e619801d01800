//! Utilities dealing with error handling in this crate.

use failure::Fail;
use nix::libc;

/// Errors produced by this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Errors originating from calls to `std::io::*`.
    #[fail(display = "IO Error - {}", _0)]
    IO(#[cause] std::io::Error),
    /// Errors originating from calls to `std::env::*`.
    #[fail(display = "Env Error - {}", _0)]
    Env(#[cause] std::env::VarError),
    /// Errors originating from calls to `regex::*`.
    #[fail(display = "Regex Error - {}", _0)]
    Regex(#[cause] regex::Error),
    /// Errors parsing Glob patterns.
    #[fail(display = "Glob Error - {}", _0)]
    GlobPattern(#[cause] glob::PatternError),
    /// Errors interating over entries in a glob.
    #[fail(display = "Glob Error - {}", _0)]
    GlobIter(#[cause] glob::GlobError),
    /// Errors caused by parsing integers from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseInt(#[cause] std::num::ParseIntError),
    /// Errors originating from calls to `libc` or other system utilties.
    #[fail(display = "System Error - {}", _0)]
    System(#[cause] nix::Error),
    /// No frequency control interface could be acquired.
    #[fail(display = "No interface for {} found", _0)]
    Discovery(String),
    /// A single physical unit could not be opened by the driver.
    #[fail(display = "Init of unit {} failed with code {}", unit, code)]
    UnitInit {
        /// Index of the unit.
        unit: usize,
        /// Negative code reported by the driver.
        code: i32,
    },
    /// Reading the affinity mask of a process or thread failed.
    #[fail(display = "sched_getaffinity failed - {}", _0)]
    Affinity(#[cause] nix::Error),
    /// The driver could not prepare a setting for the requested frequency.
    #[fail(display = "Could not prepare a frequency setting for {} Hz", _0)]
    Prepare(i64),
    /// Applying a setting to a unit failed.
    #[fail(display = "Applying setting to unit {} failed with code {}", unit, code)]
    Apply {
        /// Index of the unit.
        unit: usize,
        /// Negative code reported by the driver.
        code: i32,
    },
    /// A reset was requested but no default setting was recorded.
    #[fail(display = "No prepared default setting available")]
    NoDefault,
    /// Errors reported by a frequency driver or register interface.
    #[fail(display = "Driver Error {} - {}", code, reason)]
    Driver {
        /// Negative error code.
        code: i32,
        /// Description provided by the driver.
        reason: String,
    },
    /// A value outside the accepted range was handed to a tuning action.
    #[fail(display = "Invalid value {} - {}", value, reason)]
    InvalidValue {
        /// The rejected value.
        value: i64,
        /// What the accepted range is.
        reason: &'static str,
    },
    /// The driver does not implement an optional capability.
    #[fail(display = "Operation not supported by the interface")]
    Unsupported,
    /// The plugin was used before `initialize` succeeded.
    #[fail(display = "Plugin not initialized")]
    NotInitialized,
    /// Errors returned by the MPI tool interface.
    #[fail(display = "{} failed with code: {}", what, code)]
    Mpit {
        /// Description of the failed call.
        what: String,
        /// MPI-T return code.
        code: i32,
    },
    /// The named MPI-T control variable does not exist.
    #[fail(display = "CVar \"{}\" not found", _0)]
    CvarNotFound(String),
}

impl Error {
    /// Create a new instance of error from the `errno` variable.
    #[inline]
    pub fn from_errno() -> Self {
        Error::System(nix::Error::Sys(nix::errno::Errno::last()))
    }

    /// Status code handed back to the host for this error.
    ///
    /// Codes are negative. OS errors map to `-errno`, driver errors keep the code the driver
    /// reported and everything else becomes `-1`.
    pub fn code(&self) -> i32 {
        match self {
            Error::IO(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            Error::System(nix::Error::Sys(errno)) | Error::Affinity(nix::Error::Sys(errno)) => {
                -(*errno as i32)
            }
            Error::UnitInit { code, .. } | Error::Apply { code, .. } | Error::Driver { code, .. } => {
                negative(*code)
            }
            Error::Mpit { code, .. } => negative(*code),
            _ => -1,
        }
    }
}

fn negative(code: i32) -> i32 {
    match code {
        0 => -1,
        c if c > 0 => -c,
        c => c,
    }
}

macro_rules! error_from {
    ($et: ty => $cet: expr) => {
        impl From<$et> for Error {
            #[inline]
            fn from(err: $et) -> Self {
                $cet(err)
            }
        }
    };
}

error_from!(std::io::Error => Error::IO);
error_from!(std::env::VarError => Error::Env);
error_from!(regex::Error => Error::Regex);
error_from!(glob::PatternError => Error::GlobPattern);
error_from!(glob::GlobError => Error::GlobIter);
error_from!(std::num::ParseIntError => Error::ParseInt);
error_from!(nix::Error => Error::System);

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative() {
        let err = Error::System(nix::Error::Sys(nix::errno::Errno::ESRCH));
        assert_eq!(err.code(), -libc::ESRCH);

        let err = Error::Driver {
            code: -2,
            reason: String::from("invalid cpu"),
        };
        assert_eq!(err.code(), -2);

        let err = Error::Mpit {
            what: String::from("MPI_T_cvar_write"),
            code: 61,
        };
        assert_eq!(err.code(), -61);

        assert_eq!(Error::Prepare(1_000_000).code(), -1);
        assert_eq!(Error::NoDefault.code(), -1);
    }

    #[test]
    fn test_io_errors_keep_os_code() {
        let err: Error = std::io::Error::from_raw_os_error(libc::EACCES).into();
        assert_eq!(err.code(), -libc::EACCES);

        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "no os code").into();
        assert_eq!(err.code(), -libc::EIO);
    }
}
