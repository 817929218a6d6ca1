use super::codec::ByteReader;
use super::output::ObjectHandle;
use super::serializer::SerializerRegistry;
use super::{ReadHook, TAG_ARBITRARY, TAG_ELEMENT, TAG_FONT, TAG_IMAGE, TAG_NULL, TAG_REFERENCE, TAG_STYLE, VirtualObject};
use crate::error::FillError;
use crate::print::{ElementStyle, FontDescriptor, ImageData, PrintElement};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Reading half of one stream. Rebuilds the reference tables in the order
/// the writer filled them.
pub struct ObjectInput<'a> {
    registry: &'a SerializerRegistry,
    hook: Option<&'a dyn ReadHook>,
    reader: ByteReader<'a>,
    tables: HashMap<u8, Vec<VirtualObject>>,
    read: u64,
}

impl<'a> ObjectInput<'a> {
    pub fn new(
        stream: u64,
        registry: &'a SerializerRegistry,
        hook: Option<&'a dyn ReadHook>,
        data: &'a [u8],
    ) -> Self {
        Self {
            registry,
            hook,
            reader: ByteReader::new(stream, data),
            tables: HashMap::new(),
            read: 0,
        }
    }

    pub fn stream(&self) -> u64 {
        self.reader.stream()
    }

    pub fn reader(&mut self) -> &mut ByteReader<'a> {
        &mut self.reader
    }

    /// Object bodies decoded so far; references are not counted.
    pub fn objects_read(&self) -> u64 {
        self.read
    }

    pub fn read_object(&mut self) -> Result<VirtualObject, FillError> {
        let position = self.reader.position();
        let tag_byte = self.reader.read_u8()?;
        match tag_byte {
            TAG_NULL => return Ok(VirtualObject::Null),
            TAG_ARBITRARY => {
                let bytes = self.reader.read_bytes()?;
                let value: Value = serde_json::from_slice(bytes)
                    .map_err(|err| self.reader.malformed(format!("bad arbitrary value: {err}")))?;
                return Ok(VirtualObject::Arbitrary(value));
            }
            _ => {}
        }

        let tag = tag_byte & !TAG_REFERENCE;
        if tag_byte & TAG_REFERENCE != 0 {
            let raw = self.reader.read_varint()?;
            let index = u32::try_from(raw).map_err(|_| FillError::CorruptReference {
                stream: self.stream(),
                tag,
                index: u32::MAX,
                position,
            })?;
            return self.lookup(tag, index, position);
        }

        let registry = self.registry;
        let Some(serializer) = registry.get(tag) else {
            return Err(FillError::MalformedStream {
                stream: self.stream(),
                position,
                message: format!("unknown type tag {tag:#04x}"),
            });
        };
        let mut object = serializer.read(self)?;
        self.read += 1;
        if object.tag() != tag {
            return Err(FillError::MalformedStream {
                stream: self.stream(),
                position,
                message: format!("serializer for {tag:#04x} produced {:#04x}", object.tag()),
            });
        }
        if let Some(hook) = self.hook {
            object = hook.resolve(object);
        }
        if serializer.track_references() {
            self.tables.entry(tag).or_default().push(object.clone());
        }
        Ok(object)
    }

    fn lookup(&self, tag: u8, index: u32, position: usize) -> Result<VirtualObject, FillError> {
        self.tables
            .get(&tag)
            .and_then(|table| table.get(index as usize))
            .cloned()
            .ok_or(FillError::CorruptReference {
                stream: self.stream(),
                tag,
                index,
                position,
            })
    }

    /// Resolves a handle issued by an [`ObjectOutput`]. Handles from any other
    /// stream are rejected even when the index would be in range here.
    pub fn resolve_handle(&self, handle: ObjectHandle) -> Result<VirtualObject, FillError> {
        if handle.stream != self.stream() {
            return Err(FillError::ForeignReference {
                stream: self.stream(),
                origin: handle.stream,
                tag: handle.tag,
                index: handle.index,
            });
        }
        self.lookup(handle.tag, handle.index, self.reader.position())
    }

    fn unexpected(&self, expected: u8, found: &VirtualObject) -> FillError {
        self.reader.malformed(format!(
            "expected object {expected:#04x}, found {:#04x}",
            found.tag()
        ))
    }

    pub fn read_font(&mut self) -> Result<Arc<FontDescriptor>, FillError> {
        match self.read_object()? {
            VirtualObject::Font(font) => Ok(font),
            other => Err(self.unexpected(TAG_FONT, &other)),
        }
    }

    pub fn read_style(&mut self) -> Result<Arc<ElementStyle>, FillError> {
        match self.read_object()? {
            VirtualObject::Style(style) => Ok(style),
            other => Err(self.unexpected(TAG_STYLE, &other)),
        }
    }

    pub fn read_image(&mut self) -> Result<Arc<ImageData>, FillError> {
        match self.read_object()? {
            VirtualObject::Image(image) => Ok(image),
            other => Err(self.unexpected(TAG_IMAGE, &other)),
        }
    }

    pub fn read_element(&mut self) -> Result<PrintElement, FillError> {
        match self.read_object()? {
            VirtualObject::Element(element) => Ok(element),
            other => Err(self.unexpected(TAG_ELEMENT, &other)),
        }
    }

    pub fn read_value(&mut self) -> Result<Value, FillError> {
        match self.read_object()? {
            VirtualObject::Arbitrary(value) => Ok(value),
            VirtualObject::Null => Ok(Value::Null),
            other => Err(self.unexpected(TAG_ARBITRARY, &other)),
        }
    }
}
