pub mod chunker;
pub mod cli;
pub mod error;
pub mod ops;
pub mod progress;
pub mod session;
pub mod transport;
pub mod wire;

pub use chunker::{step_address, Chunk, Chunker};
pub use cli::Cli;
pub use error::{FelError, FelResult};
pub use progress::{NullReporter, Progress, Reporter};
pub use session::{find_device, open_default, Session, SessionError};
pub use wire::{
    FelCommand, FelMessage, FesCommand, MediaIndex, Mode, Tags, MAX_CHUNK, MBR_SIZE,
};
