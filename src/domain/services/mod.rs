mod ask;
mod reducer;
mod store;
mod sync;

pub use ask::*;
pub use reducer::*;
pub use store::*;
pub use sync::*;
