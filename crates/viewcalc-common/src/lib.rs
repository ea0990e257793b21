pub mod error;
pub mod target;
pub mod value;
pub mod value_spec;

pub use error::*;
pub use target::*;
pub use value::*;
pub use value_spec::*;
