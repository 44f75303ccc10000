//! Connector for a line-oriented server running as a child process.
//!
//! The server speaks newline-delimited text over stdin/stdout. Responses
//! carry no request identifiers and are matched to commands by order.

mod correlator;
mod error;
mod events;
mod framer;
mod gate;
mod handle;
mod process;
mod state;
mod task;

pub use correlator::*;
pub use error::*;
pub use events::*;
pub use framer::*;
pub use gate::*;
pub use handle::*;
pub use process::*;
pub use state::*;
