//! redb table definitions for the BotGrid store.
//!
//! Both tables use `&str` keys and raw `&[u8]` values. Keys are composite:
//! `{workload_id}/{relative_path}` for files and `{namespace}/{name}` for
//! archives, so a prefix scan lists one workload or one namespace.

use redb::TableDefinition;

/// Persisted workload trees keyed by `{workload_id}/{relative_path}`.
pub const FILES: ByteTable = TableDefinition::new("files");

/// Global archive blobs (revisions, exports) keyed by `{namespace}/{name}`.
pub const ARCHIVES: ByteTable = TableDefinition::new("archives");

/// Shape shared by every table of the store.
pub type ByteTable = TableDefinition<'static, &'static str, &'static [u8]>;
