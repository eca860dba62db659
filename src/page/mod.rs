//! Index pages as seen by the execution layer
//!
//! Pages are owned, bounds-checked byte buffers. Decoding returns the entry
//! and the number of bytes it occupied; raw offsets only leave this module
//! wrapped in [`EntryOffset`].
//!
//! The buffer cache and the GC registry are collaborators reached through
//! [`PageCache`] and [`GcRegistry`]. [`MemoryPageCache`] implements both in
//! memory.

mod cache;
mod checksum;
mod errors;
mod layout;
mod memory;

pub use cache::{GcPin, GcRegistry, PageCache, PageHandle, Window};
pub use errors::{PageError, PageResult};
pub use layout::{
    DecodedEntry, EntryOffset, IndexPage, IndexPageBuilder, PageEntry, PageId, PageKind,
    PAGE_HEADER_SIZE,
};
pub use memory::MemoryPageCache;
