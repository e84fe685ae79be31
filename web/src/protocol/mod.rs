//! Reflective protocol: path resolution, envelopes and content hashes.
//!
//! A request path is walked one member at a time against a service's
//! exposed object graph. Reads return the addressed member; `POST` on a
//! function calls it with the `$args` array from the JSON body. The result
//! is wrapped in an envelope carrying `$ref`, `$type` and, for objects, a
//! content hash used for conditional and long-polling reads.

mod envelope;
mod hash;
mod path;
mod router;

pub use envelope::{MAX_SNAPSHOT_DEPTH, encode, function_descriptor, member_ref};
pub use hash::{OBJECT_NAMESPACE, VOLATILE_FIELDS, content_hash, content_ids, stamp};
pub use path::{RESERVED_MEMBERS, is_private, split_path};
pub use router::{ProtocolHandler, resolve};
