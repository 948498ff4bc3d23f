// Offset-addressed binary I/O
//
// Archives address everything by absolute offset: strings live in a pool,
// collections are `_DIC` dictionaries plus a value array, and sub-records are
// reached through deferred reads that seek, read, and restore the position.

pub mod dict;
pub mod reader;
pub mod writer;

pub use dict::ResDict;
pub use reader::{BinaryReader, Decode};
pub use writer::{BinaryWriter, DictSlots, Encode};

/// Magic of a dictionary block.
pub const DICT_MAGIC: [u8; 4] = *b"_DIC";

/// Size of one dictionary node: reference, left, right, key offset.
pub const DICT_NODE_LEN: usize = 16;
