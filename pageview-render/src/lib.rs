//! Rendering backends and the software compositor for pageview.

pub mod compose;
pub mod pixels;

#[cfg(feature = "pdf")]
mod pdf;

pub use compose::{compose_frame, compose_with, Canvas};
#[cfg(feature = "pdf")]
pub use pdf::PdfiumRenderFactory;

#[cfg(feature = "pdf")]
pub type PdfRenderFactory = PdfiumRenderFactory;
