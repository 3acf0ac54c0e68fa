mod extract;
mod pack;

pub use extract::*;
pub use pack::*;
