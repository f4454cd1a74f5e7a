pub mod actuator;
pub mod sensor;

pub use actuator::*;
pub use sensor::*;
