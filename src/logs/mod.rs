// Logs module - output capture and rotation

mod router;
mod writer;

pub use router::LogRouter;
pub use writer::{LogStreamKind, LogWriter};
