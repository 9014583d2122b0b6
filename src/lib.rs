//! Read/write engine for the Expert Witness Compression Format family
//! (EWF1/E01, EWF2/Ex01, LVF/L01): segment file I/O, section parsing,
//! chunk table and cache, and a single handle façade tying them together.
//!
//! [`EwfHandle`] is the crate's entry point — open an existing image with
//! [`EwfHandle::open_read`], or start acquiring a new one with
//! [`EwfHandle::create_for_write`].

pub mod cache;
pub mod chunk_table;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod handle;
pub mod header_values;
pub mod integrity;
pub mod reader;
pub mod section;
pub mod segment;
pub mod volume;
pub mod writer;

pub use config::Config;
pub use error::{EwfError, Result};
pub use handle::{EwfHandle, HandleMode};
pub use segment::ImageFlavor;
