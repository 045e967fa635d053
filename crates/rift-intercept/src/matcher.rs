//! First-match selection over registry candidates.

use crate::expectation::Expectation;
use crate::headers::HeaderList;
use crate::predicate::BodyView;
use crate::target::RequestHead;
use std::sync::Arc;
use tracing::trace;

/// Request headers as a candidate sees them.
///
/// A `Host` header is always present: taken from the request target, or the
/// scope's canonical host when the request was claimed through a filtering
/// predicate.
pub(crate) fn derive_headers(head: &RequestHead, record: &Expectation, filtered: bool) -> HeaderList {
    let mut headers = head.headers.clone();
    let canonical = if filtered {
        record.scope().canonical_host()
    } else {
        None
    };
    match canonical {
        Some(host) => headers.set("Host", host),
        None if !headers.contains("host") => headers.set("Host", head.target.host_header()),
        None => {}
    }
    headers
}

/// Find the first candidate, in registration order, that accepts the request.
pub fn find_match(
    candidates: &[Arc<Expectation>],
    filtered: bool,
    head: &RequestHead,
    body: &BodyView<'_>,
) -> Option<Arc<Expectation>> {
    candidates
        .iter()
        .find(|record| {
            let headers = derive_headers(head, record, filtered);
            let matched = record.matches(head, &headers, body);
            trace!(
                expectation = record.id(),
                matched,
                "evaluated {}",
                record.describe()
            );
            matched
        })
        .cloned()
}
