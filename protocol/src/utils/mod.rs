pub mod encoding;
pub mod place_holder;

pub use encoding::Encoding;
pub use place_holder::{PlaceHolderError, PlaceHolderRender};
