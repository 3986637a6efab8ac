pub mod proxy;
pub mod source;
pub mod target;

pub use proxy::*;
pub use source::*;
pub use target::*;
