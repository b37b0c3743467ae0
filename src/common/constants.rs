// Reserved document fields
pub const DOC_ID: &str = "$id";
pub const DOC_META: &str = "meta";
pub const RESERVED_FIELDS: [&str; 2] = [DOC_ID, DOC_META];

// Metadata fields
pub const META_VERSION: &str = "version";
pub const META_REVISION: &str = "revision";
pub const META_CREATED: &str = "created";
pub const META_UPDATED: &str = "updated";

// Event type used by the event bus
pub const OPAL_EVENT: &str = "opal_event";

// Field path separator for embedded documents
pub const FIELD_SEPARATOR: &str = ".";

// Initial metadata version stamped on newly inserted documents
pub const INITIAL_VERSION: i64 = 0;

pub const OPAL_VERSION: &str = env!("CARGO_PKG_VERSION");
