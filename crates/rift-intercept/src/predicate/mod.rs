//! Request predicates evaluated by the matcher.
//!
//! Each part of an outgoing request (path, query, headers, body) has its own
//! matcher type. Exact values, regular expressions and custom closures are
//! all accepted through `From` conversions.

mod body;
mod header;
mod path;
mod value;

pub use body::{BodyFn, BodyMatcher, BodyView};
pub(crate) use body::parse_body;
pub use header::{headers_satisfied, HeaderMatcher};
pub use path::{parse_query_string, PathFn, PathMatcher, QueryFn, QueryMatcher};
pub use value::{CachedValue, ValueMatcher};
