//! RDF triple serialization of a subject's attributes.
//!
//! Emits every asserted statement of one subject through a caller-supplied
//! byte sink, as `<subject> <predicate> "literal"` triples: subject and
//! predicate are URI references, objects are plain literals with no
//! language tag and no datatype.
//!
//! The attribute scan probes index keys `"<sid>:<aid>"` for every `aid`
//! up to the attribute registry's MAX counter instead of enumerating the
//! registry — an index-only walk that allocates nothing per miss. It is
//! sound because attribute IDs are never reused.
//!
//! Output is staged through a ~100 KiB buffer to keep sink calls coarse;
//! [`RdfSerializer::close`] flushes the remainder. Dropping the
//! serializer without closing it discards buffered output.

use log::warn;

use crate::error::{RdfError, StoreError};
use crate::resolver::Resolver;

/// Attributes in this namespace are never exported.
pub const VOLATILE_NS: &[u8] = b"aff4volatile:";

/// Staging buffer size before the sink is invoked.
const SINK_BUF_LEN: usize = 102_400;

/// Supported serialization syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    /// Terse triple syntax with `@base`/`@prefix` headers.
    Turtle,
    /// One plain triple per line, no headers.
    NTriples,
}

impl std::str::FromStr for RdfFormat {
    type Err = RdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turtle" => Ok(Self::Turtle),
            "ntriples" => Ok(Self::NTriples),
            other => Err(RdfError::UnknownFormat {
                found: other.to_string(),
            }),
        }
    }
}

/// Streaming triple serializer over one [`Resolver`].
pub struct RdfSerializer<'a> {
    resolver: &'a Resolver,
    sink: Box<dyn FnMut(&[u8]) + 'a>,
    format: RdfFormat,
    buffer: Vec<u8>,
}

impl<'a> RdfSerializer<'a> {
    /// Create a serializer writing to `sink`.
    ///
    /// A non-empty `base` URI becomes an `@base` header in Turtle output;
    /// N-Triples has no header syntax and ignores it.
    pub fn new(
        resolver: &'a Resolver,
        sink: impl FnMut(&[u8]) + 'a,
        base: &str,
        format: RdfFormat,
    ) -> Self {
        let mut serializer = Self {
            resolver,
            sink: Box::new(sink),
            format,
            buffer: Vec::with_capacity(SINK_BUF_LEN),
        };
        if format == RdfFormat::Turtle && !base.is_empty() {
            let header = format!("@base <{}> .\n", escape_iri(base.as_bytes()));
            serializer.write(header.as_bytes());
        }
        serializer
    }

    /// Declare a namespace prefix in the emitted document.
    ///
    /// Turtle emits an `@prefix` line at the current output position;
    /// declare namespaces before the first `serialize_urn` call.
    /// N-Triples ignores namespaces.
    pub fn set_namespace(&mut self, uri: &str, prefix: &str) {
        if self.format == RdfFormat::Turtle {
            let line = format!("@prefix {prefix}: <{}> .\n", escape_iri(uri.as_bytes()));
            self.write(line.as_bytes());
        }
    }

    /// Emit one triple per value of every asserted attribute of `urn`.
    ///
    /// Attributes in the volatile namespace and attributes named in
    /// `exclude` are skipped. Truncated or oversize value records end
    /// that attribute's list silently.
    ///
    /// # Errors
    ///
    /// Returns [`RdfError::SubjectNotFound`] when `urn` is not interned,
    /// or [`RdfError::Store`] on a table failure.
    pub fn serialize_urn(&mut self, urn: &[u8], exclude: &[&[u8]]) -> Result<(), RdfError> {
        let sid = self.resolver.get_id_by_urn(urn, false)?;
        if sid == 0 {
            return Err(RdfError::SubjectNotFound {
                urn: String::from_utf8_lossy(urn).into_owned(),
            });
        }

        let max_aid = self
            .resolver
            .attributes()
            .max_id()
            .map_err(StoreError::from)?;

        for aid in 1..=max_aid {
            let key = format!("{sid}:{aid}");
            let offset = self.resolver.head_offset(&key)?;
            if offset == 0 {
                continue;
            }
            let Some(name) = self
                .resolver
                .attributes()
                .get_name(aid)
                .map_err(StoreError::from)?
            else {
                warn!("index entry {key} names unregistered attribute {aid}");
                continue;
            };
            if name.starts_with(VOLATILE_NS) || exclude.contains(&name.as_slice()) {
                continue;
            }

            let Some(head) = self.resolver.log().read_head(offset) else {
                continue; // truncated under the head
            };
            for value in self.resolver.collect_list(offset, head) {
                self.emit_triple(urn, &name, &value);
            }
        }
        Ok(())
    }

    /// Flush remaining buffered output and finish the stream.
    pub fn close(mut self) {
        self.flush();
    }

    fn emit_triple(&mut self, subject: &[u8], predicate: &[u8], object: &[u8]) {
        let line = format!(
            "<{}> <{}> \"{}\" .\n",
            escape_iri(subject),
            escape_iri(predicate),
            escape_literal(object)
        );
        self.write(line.as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        if self.buffer.len() + bytes.len() >= SINK_BUF_LEN {
            self.flush();
        }
        if bytes.len() >= SINK_BUF_LEN {
            (self.sink)(bytes);
        } else {
            self.buffer.extend_from_slice(bytes);
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            (self.sink)(&self.buffer);
            self.buffer.clear();
        }
    }
}

/// Render bytes as the inside of a `<...>` IRI reference.
///
/// Characters the grammar forbids inside an IRIREF are percent-encoded;
/// everything else passes through as UTF-8 (lossy).
fn escape_iri(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{00}'..='\u{20}' | '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

/// Render bytes as the inside of a double-quoted literal.
fn escape_literal(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
