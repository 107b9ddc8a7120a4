pub mod events;
pub mod messages;

pub use events::*;
pub use messages::*;
