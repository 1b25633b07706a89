/// Object id 0 denotes null. It is never enqueued and never dominated.
pub const NULL_OBJECT_ID: u64 = 0;

/// VM-internal bookkeeping field on class dumps, skipped during static field
/// traversal.
pub const STATIC_OVERHEAD_FIELD: &str = "$staticOverhead";

/// Capacity of the per-call cache of merged instance-field exclusion maps,
/// keyed by class id.
pub const EXCLUSION_CACHE_SIZE: usize = 4096;

/// HPROF string ids handed out by snapshot builders live in a range far away
/// from heap object ids.
pub const STRING_ID_SEED: u64 = 1 << 61;

pub const BYTES_IN_BOOLEAN: usize = 1;
pub const BYTES_IN_BYTE: usize = 1;
pub const BYTES_IN_SHORT: usize = 2;
pub const BYTES_IN_CHAR: usize = 2;
pub const BYTES_IN_INT: usize = 4;
pub const BYTES_IN_FLOAT: usize = 4;
pub const BYTES_IN_LONG: usize = 8;
pub const BYTES_IN_DOUBLE: usize = 8;
