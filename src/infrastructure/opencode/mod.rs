mod client;
mod feed;
mod options;

pub use client::*;
pub use feed::*;
pub use options::*;
