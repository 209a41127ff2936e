use winvmi_core::VmiError;

/// Error type for the dump drivers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error occurred while parsing a kernel dump file.
    #[error(transparent)]
    Kdmp(#[from] kdmp_parser::error::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Operation not supported.
    #[error("Operation not supported")]
    NotSupported,

    /// The address is not covered by the dump.
    #[error("Out of bounds")]
    OutOfBounds,
}

impl From<Error> for VmiError {
    fn from(value: Error) -> Self {
        match value {
            // Physical reads carry no virtual address, so a page that is
            // missing from the dump is simply not backed.
            Error::Kdmp(kdmp_parser::error::Error::PageRead(_)) => Self::OutOfBounds,
            Error::Kdmp(value) => Self::Driver(Box::new(value)),
            Error::Io(value) => Self::Io(value),
            Error::NotSupported => Self::NotSupported,
            Error::OutOfBounds => Self::OutOfBounds,
        }
    }
}
