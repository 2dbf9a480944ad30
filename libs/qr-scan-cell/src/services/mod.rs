pub mod camera;
pub mod controller;
pub mod decoder;
pub mod interpreter;
pub mod resolver;
pub mod source;

pub use camera::*;
pub use controller::*;
pub use decoder::*;
pub use interpreter::*;
pub use resolver::*;
pub use source::*;
