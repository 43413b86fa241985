mod agent;
mod event;
mod message;
mod part;
mod prompt;
mod provider;
mod question;
mod session;
mod status;

pub use agent::*;
pub use event::*;
pub use message::*;
pub use part::*;
pub use prompt::*;
pub use provider::*;
pub use question::*;
pub use session::*;
pub use status::*;
