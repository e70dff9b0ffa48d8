//! Propagation of the action context across message boundaries

use crate::{ActionId, ContextError, Current};
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Multi-valued header carrying the active action ids, outermost first
pub const LRA_HTTP_CONTEXT_HEADER: HeaderName = HeaderName::from_static("long-running-action");

/// Header naming the parent of a nested action on participant callbacks
pub const LRA_HTTP_PARENT_CONTEXT_HEADER: HeaderName =
    HeaderName::from_static("long-running-action-parent");

/// Read every action id carried by the context header.
///
/// Repeated header values and comma separated lists are both accepted; order
/// is preserved.
pub fn read_context_header(headers: &HeaderMap) -> Result<Vec<ActionId>, ContextError> {
    let mut ids = Vec::new();
    for value in headers.get_all(&LRA_HTTP_CONTEXT_HEADER) {
        let raw = value
            .to_str()
            .map_err(|e| ContextError::InvalidHeader(e.to_string().into()))?;
        ids.extend(raw.split(',').filter_map(ActionId::parse));
    }
    Ok(ids)
}

/// Parent id of a nested action, if the header is present
pub fn read_parent_header(headers: &HeaderMap) -> Result<Option<ActionId>, ContextError> {
    match headers.get(&LRA_HTTP_PARENT_CONTEXT_HEADER) {
        Some(value) => value
            .to_str()
            .map(ActionId::parse)
            .map_err(|e| ContextError::InvalidHeader(e.to_string().into())),
        None => Ok(None),
    }
}

/// Replace the context header with `ids`; an empty slice strips it
pub fn write_context_header(headers: &mut HeaderMap, ids: &[ActionId]) -> Result<(), ContextError> {
    headers.remove(&LRA_HTTP_CONTEXT_HEADER);
    for id in ids {
        let value = HeaderValue::from_str(id.as_str())
            .map_err(|e| ContextError::InvalidHeader(e.to_string().into()))?;
        headers.append(LRA_HTTP_CONTEXT_HEADER, value);
    }
    Ok(())
}

impl Current {
    /// Seed the calling chain from an inbound message before nested work starts.
    ///
    /// Returns the ids that were carried, in header order.
    pub fn accept_inbound(headers: &HeaderMap) -> Result<Vec<ActionId>, ContextError> {
        let ids = read_context_header(headers)?;
        for id in &ids {
            Current::push(id.clone())?;
        }
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), innermost = ?ids.last(), "Seeded context from inbound header");
        }
        Ok(ids)
    }

    /// Stamp an outbound message with the chain's snapshot.
    ///
    /// With no active action any stale header value is removed.
    pub fn stamp_outbound(headers: &mut HeaderMap) -> Result<(), ContextError> {
        write_context_header(headers, &Current::snapshot())
    }

    /// Strip the header and drop the chain's frame
    pub fn clear(headers: &mut HeaderMap) {
        headers.remove(&LRA_HTTP_CONTEXT_HEADER);
        Current::pop_all();
    }
}
