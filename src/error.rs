//! Error type shared by the whole crate.

/// Possible plume-rise errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PlumeError {
    /// The inputs don't have the expected shape(s)
    InconsistentInputs,
    /// A sounding needs at least two levels to interpolate
    TooFewLevels(usize),
    /// Sounding heights must be strictly increasing
    NonMonotonicHeights,
    /// An input value is NaN or infinite
    NonFinite(&'static str),
    /// A physical input is out of its valid range
    InvalidInput(&'static str),
    /// The intensity method tag isn't one we know
    UnknownIntensityMethod(String),
    /// The plume-rise model tag isn't one we know
    UnknownPlumeRiseModel(String),
    /// The configuration couldn't be parsed or is invalid
    InvalidConfig(String),
    /// An array is not contiguous when it was assumed to be
    NotContiguous,
    /// The operation was aborted early
    Cancelled,
}

impl std::fmt::Display for PlumeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlumeError::InconsistentInputs => {
                write!(f, "inputs to plume rise have the wrong shape")
            }
            PlumeError::TooFewLevels(n) => {
                write!(f, "sounding has {n} levels, at least 2 are needed")
            }
            PlumeError::NonMonotonicHeights => {
                write!(f, "sounding heights are not strictly increasing")
            }
            PlumeError::NonFinite(what) => write!(f, "non-finite value in {what}"),
            PlumeError::InvalidInput(what) => write!(f, "invalid input: {what}"),
            PlumeError::UnknownIntensityMethod(tag) => write!(
                f,
                "unrecognized intensity method \"{tag}\" (available: \"hc\", \"mass\")"
            ),
            PlumeError::UnknownPlumeRiseModel(tag) => write!(
                f,
                "unrecognized plume-rise model \"{tag}\" (available: \"static_area\", \"cwipp\")"
            ),
            PlumeError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            PlumeError::NotContiguous => write!(f, "array slice not contiguous in memory"),
            PlumeError::Cancelled => write!(f, "operation cancelled early"),
        }
    }
}

impl std::error::Error for PlumeError {}

impl From<serde_json::Error> for PlumeError {
    fn from(e: serde_json::Error) -> Self {
        PlumeError::InvalidConfig(e.to_string())
    }
}
