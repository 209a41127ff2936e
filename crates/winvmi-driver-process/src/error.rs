use winvmi_core::VmiError;

/// Error type for the process memory driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A line of the process memory map could not be parsed.
    #[error("Malformed memory map (line {line})")]
    MalformedMaps {
        /// One-based line number.
        line: usize,
    },

    /// The process has no mapping that looks like guest RAM.
    #[error("No guest RAM mapping found")]
    NoGuestRam,
}

impl From<Error> for VmiError {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(value) => Self::BackendUnavailable(value),
            other => Self::Driver(Box::new(other)),
        }
    }
}
