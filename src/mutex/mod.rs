pub mod guard;
pub mod message;
pub mod neighbors;
pub mod processor;
pub mod recovery;
pub mod state;

pub use guard::*;
pub use message::*;
pub use neighbors::*;
pub use processor::*;
pub use recovery::*;
pub use state::*;
