//! Page virtualization: finished pages are serialized into self-contained
//! streams and parked in a [`SwapStore`] until they are needed again.
//!
//! Stream layout:
//!
//! ```text
//! "RFVP" | version u8 | stream id (varint) | element count (varint)
//!        | element objects ... | SHA-256 of everything before
//! ```
//!
//! Each object starts with a tag byte. `NULL` and `ARBITRARY` are
//! self-contained; type tags select a serializer from the
//! [`SerializerRegistry`]. With the reference bit set the tag is followed by a
//! varint index into that type's table instead of the object body. Tables
//! belong to one stream and are rebuilt by the reader in the same post-order
//! the writer registered them in.

pub mod codec;
pub mod context;
pub mod input;
pub mod output;
pub mod serializer;
pub mod store;

pub use context::{VirtualizationContext, Virtualizer};
pub use input::ObjectInput;
pub use output::{ObjectHandle, ObjectOutput};
pub use serializer::{ObjectSerializer, SerializerRegistry};
pub use store::{MemoryStore, StoreHandle, SwapStore};

use crate::error::FillError;
use crate::print::{ElementStyle, FontDescriptor, ImageData, PrintElement, PrintPage};
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const TAG_NULL: u8 = 0x00;
pub const TAG_ARBITRARY: u8 = 0x01;
pub const TAG_FONT: u8 = 0x02;
pub const TAG_STYLE: u8 = 0x03;
pub const TAG_IMAGE: u8 = 0x04;
pub const TAG_ELEMENT: u8 = 0x05;
pub const TAG_REFERENCE: u8 = 0x80;

const MAGIC: &[u8; 4] = b"RFVP";
const VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;

/// Borrowed object about to be written.
#[derive(Debug, Clone, Copy)]
pub enum ObjectRef<'a> {
    Null,
    Arbitrary(&'a Value),
    Font(&'a Arc<FontDescriptor>),
    Style(&'a Arc<ElementStyle>),
    Image(&'a Arc<ImageData>),
    Element(&'a PrintElement),
}

impl ObjectRef<'_> {
    pub fn tag(&self) -> u8 {
        match self {
            ObjectRef::Null => TAG_NULL,
            ObjectRef::Arbitrary(_) => TAG_ARBITRARY,
            ObjectRef::Font(_) => TAG_FONT,
            ObjectRef::Style(_) => TAG_STYLE,
            ObjectRef::Image(_) => TAG_IMAGE,
            ObjectRef::Element(_) => TAG_ELEMENT,
        }
    }

    /// Write-side identity: the shared allocation, so two `Arc`s of the same
    /// style are one object and two equal but separate styles are two.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            ObjectRef::Font(font) => Some(Arc::as_ptr(font) as *const () as usize),
            ObjectRef::Style(style) => Some(Arc::as_ptr(style) as *const () as usize),
            ObjectRef::Image(image) => Some(Arc::as_ptr(image) as *const () as usize),
            ObjectRef::Element(element) => Some(*element as *const PrintElement as usize),
            ObjectRef::Null | ObjectRef::Arbitrary(_) => None,
        }
    }
}

/// Decoded object.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualObject {
    Null,
    Arbitrary(Value),
    Font(Arc<FontDescriptor>),
    Style(Arc<ElementStyle>),
    Image(Arc<ImageData>),
    Element(PrintElement),
}

impl VirtualObject {
    pub fn tag(&self) -> u8 {
        match self {
            VirtualObject::Null => TAG_NULL,
            VirtualObject::Arbitrary(_) => TAG_ARBITRARY,
            VirtualObject::Font(_) => TAG_FONT,
            VirtualObject::Style(_) => TAG_STYLE,
            VirtualObject::Image(_) => TAG_IMAGE,
            VirtualObject::Element(_) => TAG_ELEMENT,
        }
    }

    pub fn as_ref(&self) -> ObjectRef<'_> {
        match self {
            VirtualObject::Null => ObjectRef::Null,
            VirtualObject::Arbitrary(value) => ObjectRef::Arbitrary(value),
            VirtualObject::Font(font) => ObjectRef::Font(font),
            VirtualObject::Style(style) => ObjectRef::Style(style),
            VirtualObject::Image(image) => ObjectRef::Image(image),
            VirtualObject::Element(element) => ObjectRef::Element(element),
        }
    }
}

/// Post-processing applied to every freshly decoded object, e.g. rebinding
/// font names to the fonts registered in this process.
pub trait ReadHook: Send + Sync {
    fn resolve(&self, object: VirtualObject) -> VirtualObject;
}

/// Serializes one page into a new stream.
pub fn write_page(
    registry: &SerializerRegistry,
    stream: u64,
    page: &PrintPage,
) -> Result<Vec<u8>, FillError> {
    let mut output = ObjectOutput::new(stream, registry);
    {
        let writer = output.writer();
        writer.write_raw(MAGIC);
        writer.write_u8(VERSION);
        writer.write_varint(stream);
        writer.write_varint(page.elements.len() as u64);
    }
    for element in &page.elements {
        output.write_object(ObjectRef::Element(element))?;
    }
    let mut bytes = output.into_bytes();
    let digest = Sha256::digest(&bytes);
    bytes.extend_from_slice(&digest);
    Ok(bytes)
}

/// Reads a page written by [`write_page`] for `stream`.
pub fn read_page(
    registry: &SerializerRegistry,
    hook: Option<&dyn ReadHook>,
    stream: u64,
    bytes: &[u8],
) -> Result<PrintPage, FillError> {
    let malformed = |position: usize, message: &str| FillError::MalformedStream {
        stream,
        position,
        message: message.to_string(),
    };
    if bytes.len() < MAGIC.len() + 1 + DIGEST_LEN {
        return Err(malformed(0, "stream shorter than header and digest"));
    }
    let body_len = bytes.len() - DIGEST_LEN;
    let (body, digest) = bytes.split_at(body_len);
    if Sha256::digest(body).as_slice() != digest {
        return Err(malformed(body_len, "digest mismatch"));
    }

    let mut input = ObjectInput::new(stream, registry, hook, body);
    let reader = input.reader();
    if reader.read_raw(MAGIC.len())? != MAGIC {
        return Err(malformed(0, "bad magic"));
    }
    let version = reader.read_u8()?;
    if version != VERSION {
        return Err(reader.malformed(format!("unsupported version {version}")));
    }
    let written_by = reader.read_varint()?;
    if written_by != stream {
        return Err(reader.malformed(format!("stream was written as {written_by}")));
    }
    let count = reader.read_count()?;

    let mut page = PrintPage::new();
    for _ in 0..count {
        page.push(input.read_element()?);
    }
    if input.reader().remaining() != 0 {
        return Err(input.reader().malformed("trailing bytes after last element"));
    }
    Ok(page)
}
