//! Termination links advertised to the coordinator on enlistment

use crate::{Operation, ParticipantDescriptor};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Path segment under which participant callbacks are served
pub const RESOURCE_PATH: &str = "lra-participant";

/// Everything but RFC 3986 unreserved characters is escaped in the owner segment
const OWNER_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Callback URL for one operation of one participant type
pub fn callback_url(base_url: &str, owner: &str, operation: Operation) -> String {
    format!(
        "{}/{}/{}/{}",
        base_url.trim_end_matches('/'),
        RESOURCE_PATH,
        utf8_percent_encode(owner, OWNER_SEGMENT),
        operation.as_str()
    )
}

/// The set of termination URLs a participant advertises, one per operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnlistmentLinks {
    links: BTreeMap<&'static str, String>,
}

impl EnlistmentLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links for every operation `descriptor` has a callback for
    pub fn for_descriptor(descriptor: &ParticipantDescriptor, base_url: &str) -> Self {
        let mut links = Self::new();
        links.augment(descriptor, base_url);
        links
    }

    /// Add links for the descriptor's operations; existing entries are kept
    pub fn augment(&mut self, descriptor: &ParticipantDescriptor, base_url: &str) {
        for operation in descriptor.operations() {
            self.links
                .entry(operation.as_str())
                .or_insert_with(|| callback_url(base_url, descriptor.owner(), operation));
        }
    }

    /// Set a link explicitly, replacing any previous one
    pub fn insert(&mut self, operation: Operation, url: impl Into<String>) {
        self.links.insert(operation.as_str(), url.into());
    }

    pub fn get(&self, operation: Operation) -> Option<&str> {
        self.links.get(operation.as_str()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Render as a `Link` header value
    pub fn to_header(&self) -> String {
        Operation::ALL
            .iter()
            .filter_map(|op| {
                self.links
                    .get(op.as_str())
                    .map(|url| format!("<{}>; rel=\"{}\"; type=\"text/plain\"", url, op.as_str()))
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse a `Link` header back into termination links.
///
/// Entries with an unknown relation are ignored; malformed entries are skipped.
pub fn parse_link_header(header: &str) -> EnlistmentLinks {
    let mut links = EnlistmentLinks::new();
    for entry in header.split(',') {
        let mut parts = entry.split(';').map(str::trim);
        let Some(target) = parts
            .next()
            .and_then(|t| t.strip_prefix('<'))
            .and_then(|t| t.strip_suffix('>'))
        else {
            continue;
        };
        let rel = parts.find_map(|param| {
            param
                .strip_prefix("rel=")
                .map(|value| value.trim_matches('"'))
        });
        if let Some(operation) = rel.and_then(Operation::from_rel) {
            links.insert(operation, target);
        }
    }
    links
}

/// Split a callback URL produced by [`callback_url`] into the decoded owner
/// and the operation
pub fn parse_callback_url(url: &str) -> Option<(Cow<'_, str>, Operation)> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let operation = Operation::from_rel(segments.next()?)?;
    let owner = segments.next()?;
    if segments.next()? != RESOURCE_PATH {
        return None;
    }
    let owner = percent_decode_str(owner).decode_utf8().ok()?;
    (!owner.is_empty()).then_some((owner, operation))
}
