//! Core of loomio: a single-threaded, cooperative event-loop framework.
//!
//! [`buffer`] is the FIFO byte buffer every stream reads into and writes
//! out of. [`hook`] is the reentrancy-safe edge-triggered callback
//! primitive everything else is built from. [`main_loop`] drives hooks to
//! readiness over timers, I/O, and idle work. [`stream`] composes hooks
//! into a readable/writable byte endpoint and the pumps that connect two
//! of them. [`zlib`] layers gzip/zlib compression onto that model.
//! [`http`] holds the content router (multi-axis HTTP dispatch) and the
//! compressed trie it's built on.

pub mod buffer;
pub mod config;
pub mod error;
pub mod hook;
pub mod http;
pub mod lexer;
pub mod main_loop;
pub mod prelude;
pub mod stream;
pub mod zlib;

pub use error::{Error, Result};
