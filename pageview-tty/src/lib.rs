//! Terminal front end: kitty graphics output and key/mouse mapping.

mod input;
mod kitty;

pub use input::{CellPosition, EventMapper, UiEvent};
pub use kitty::{Frame, KittyPresenter, Placement, PresentOutcome};
