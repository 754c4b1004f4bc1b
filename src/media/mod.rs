/// Media index module
///
/// This module stands in for the platform media index:
/// - Shared data structures for folders and media records (data.rs)
/// - Folder and media enumeration plus deletion (library.rs)

pub mod data;
pub mod library;

pub use data::{FolderSummary, MediaFilter, MediaRecord};
pub use library::{FsMediaIndex, MediaIndex};
