use winvmi_core::VmiError;

/// Error types for Windows operations.
#[derive(thiserror::Error, Debug)]
pub enum WindowsError {
    /// Guest memory could not be accessed.
    #[error(transparent)]
    Vmi(#[from] VmiError),

    /// The guest context could not be attached.
    #[error(transparent)]
    Init(#[from] InitError),

    /// An executable image is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The requested process, module or export does not exist.
    #[error("Not found")]
    NotFound,

    /// The process has no readable environment block or loader data.
    #[error("Process environment block not available")]
    NoPeb,

    /// A list walk stopped early.
    #[error(transparent)]
    Enum(#[from] EnumError),
}

impl From<WindowsError> for VmiError {
    fn from(value: WindowsError) -> Self {
        match value {
            WindowsError::Vmi(err) => err,
            other => VmiError::Os(other.into()),
        }
    }
}

/// Errors that prevent a [`GuestContext`] from being created.
///
/// [`GuestContext`]: crate::GuestContext
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    /// A structure offset is structurally invalid.
    #[error("Malformed offsets table (field `{0}`)")]
    MalformedOffsets(&'static str),

    /// The kernel image could not be located.
    #[error("Kernel image not found")]
    KernelNotFound,

    /// The kernel image headers are malformed.
    #[error("Kernel image: {0}")]
    Format(#[from] FormatError),

    /// The kernel does not export a required symbol.
    #[error("Kernel export `{0}` not found")]
    MissingExport(&'static str),

    /// The initial system process record is unreadable or invalid.
    #[error("Initial process record is invalid")]
    InitialProcess,

    /// Guest memory could not be accessed.
    #[error(transparent)]
    Vmi(#[from] VmiError),
}

/// Errors in the layout of an executable image.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// A header signature or magic value is wrong, or a header does not fit.
    #[error("Bad image signature")]
    BadSignature,

    /// The export directory is cut short or points outside the image.
    #[error("Truncated export directory")]
    TruncatedDirectory,
}

/// Reasons a guest list walk stopped before reaching its end.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumError {
    /// The walk exceeded its bound or revisited an entry.
    #[error("List walk truncated")]
    Truncated,

    /// A link pointer could not be read.
    #[error("Broken list link")]
    BrokenLink,
}
