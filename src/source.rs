pub mod pdml;

pub use pdml::{Attributes, Element, ElementParser};
