//! Filesystem primitives for the hot (RAM) and cold (persistent) capture tiers.

pub mod content;
pub mod error;
pub mod file;
pub mod hot;
pub mod layout;
pub mod mount;
mod path;
pub mod relocate;

pub use crate::content::ContentType;
pub use crate::file::FileInfo;
pub use crate::hot::HotTier;
pub use crate::layout::{ColdLayout, Hour};
pub use crate::path::{file_name, validate_absolute};
pub use crate::relocate::{Relocation, relocate};
