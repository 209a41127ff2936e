mod access_context;
mod info;
pub(crate) mod macros;

pub use self::{
    access_context::{AccessContext, Gfn, Pa, TranslationMechanism, Va},
    info::VmiInfo,
};

/// A trait for types that are located at a guest virtual address.
pub trait VmiVa {
    /// Returns the virtual address of the object.
    fn va(&self) -> Va;
}
