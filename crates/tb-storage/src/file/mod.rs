//! Low-level file I/O: append/read/delete/move with advisory locking.

pub mod handler;
pub mod lock;

pub use handler::{FileHandler, PlainFileHandler};
pub use lock::{FileLock, LockMode};
