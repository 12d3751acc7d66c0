//! # sevenzip-plugins
//!
//! A safe Rust framework for creating 7-Zip format plugins, and a bundler
//! that links many plugin crates into one 7-Zip format library.
//!
//! This crate hides all the unsafe COM/vtable complexity behind safe Rust traits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sevenzip_plugins::prelude::*;
//!
//! #[derive(Default)]
//! struct MyFormat {
//!     items: Vec<ArchiveItem>,
//!     data: Vec<Vec<u8>>,
//! }
//!
//! impl ArchiveFormat for MyFormat {
//!     fn name() -> &'static str { "MyFormat" }
//!     fn extension() -> &'static str { "myf" }
//!     fn class_id() -> Guid { Guid::from_u128(0x3a128a09_88fe_45db_8727_565dff106ebe) }
//! }
//!
//! impl ArchiveReader for MyFormat {
//!     fn open(&mut self, reader: &mut dyn ReadSeek, size: u64) -> Result<()> { /* ... */ }
//!     fn item_count(&self) -> usize { self.items.len() }
//!     fn get_item(&self, index: usize) -> Option<&ArchiveItem> { self.items.get(index) }
//!     fn extract(&mut self, index: usize) -> Result<Vec<u8>> { /* ... */ }
//! }
//!
//! pub fn register(registry: &mut Registry) {
//!     registry.register_reader::<MyFormat>();
//! }
//!
//! // Only in the crate that becomes the DLL; the bundler generates this line.
//! sevenzip_plugins::export_plugin!(register);
//! ```

mod error;
mod registry;
mod traits;
mod types;

#[doc(hidden)]
pub mod abi;
#[doc(hidden)]
pub mod debug;

#[cfg(feature = "cli")]
pub mod builder;

pub mod prelude {
    //! Re-exports of commonly used types and traits.
    pub use crate::abi::{Guid, parse_guid, seven_zip_format};
    pub use crate::error::*;
    pub use crate::registry::*;
    pub use crate::traits::*;
    pub use crate::types::*;
}

pub use prelude::*;
