use super::codec::ByteWriter;
use super::serializer::SerializerRegistry;
use super::{ObjectRef, TAG_ARBITRARY, TAG_NULL, TAG_REFERENCE};
use crate::error::FillError;
use std::collections::HashMap;

/// Stream-scoped reference to an object registered while writing. Only the
/// stream that issued it can resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub stream: u64,
    pub tag: u8,
    pub index: u32,
}

/// Writing half of one stream. Append-only and single pass: an object's
/// table index is assigned after its body (and everything it contains) has
/// been written.
pub struct ObjectOutput<'r> {
    stream: u64,
    registry: &'r SerializerRegistry,
    writer: ByteWriter,
    tables: HashMap<u8, HashMap<usize, u32>>,
    written: u64,
    references: u64,
}

impl<'r> ObjectOutput<'r> {
    pub fn new(stream: u64, registry: &'r SerializerRegistry) -> Self {
        Self {
            stream,
            registry,
            writer: ByteWriter::new(),
            tables: HashMap::new(),
            written: 0,
            references: 0,
        }
    }

    pub fn stream(&self) -> u64 {
        self.stream
    }

    pub fn writer(&mut self) -> &mut ByteWriter {
        &mut self.writer
    }

    /// Object bodies written by serializers.
    pub fn objects_written(&self) -> u64 {
        self.written
    }

    pub fn references_written(&self) -> u64 {
        self.references
    }

    pub fn write_object(&mut self, object: ObjectRef<'_>) -> Result<(), FillError> {
        match object {
            ObjectRef::Null => {
                self.writer.write_u8(TAG_NULL);
                Ok(())
            }
            ObjectRef::Arbitrary(value) => {
                let encoded = serde_json::to_vec(value).map_err(|err| FillError::MalformedStream {
                    stream: self.stream,
                    position: self.writer.len(),
                    message: format!("cannot encode value: {err}"),
                })?;
                self.writer.write_u8(TAG_ARBITRARY);
                self.writer.write_bytes(&encoded);
                Ok(())
            }
            typed => self.write_typed(typed),
        }
    }

    fn write_typed(&mut self, object: ObjectRef<'_>) -> Result<(), FillError> {
        let tag = object.tag();
        let registry = self.registry;
        let Some(serializer) = registry.get(tag) else {
            return Err(FillError::InvalidConfiguration(format!(
                "no serializer registered for tag {tag:#04x}"
            )));
        };
        let identity = if serializer.track_references() {
            object.identity()
        } else {
            None
        };
        if let Some(identity) = identity {
            if let Some(index) = self.tables.get(&tag).and_then(|table| table.get(&identity)) {
                let index = *index;
                self.writer.write_u8(tag | TAG_REFERENCE);
                self.writer.write_varint(u64::from(index));
                self.references += 1;
                return Ok(());
            }
        }

        self.writer.write_u8(tag);
        serializer.write(self, object)?;
        self.written += 1;
        if let Some(identity) = identity {
            let table = self.tables.entry(tag).or_default();
            let index = u32::try_from(table.len()).map_err(|_| {
                FillError::InvalidConfiguration(format!("reference table {tag:#04x} is full"))
            })?;
            table.insert(identity, index);
        }
        Ok(())
    }

    /// Handle of an object already written to this stream.
    pub fn handle_of(&self, object: ObjectRef<'_>) -> Option<ObjectHandle> {
        let tag = object.tag();
        let identity = object.identity()?;
        let index = *self.tables.get(&tag)?.get(&identity)?;
        Some(ObjectHandle {
            stream: self.stream,
            tag,
            index,
        })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{ElementStyle, FontDescriptor};
    use crate::virtualization::TAG_FONT;
    use std::sync::Arc;

    #[test]
    fn repeated_objects_become_references() {
        let registry = SerializerRegistry::with_defaults();
        let font = Arc::new(FontDescriptor::default());
        let twin = Arc::new(FontDescriptor::default());
        let mut output = ObjectOutput::new(1, &registry);
        output.write_object(ObjectRef::Font(&font)).unwrap();
        let after_first = output.writer().len();
        output.write_object(ObjectRef::Font(&font)).unwrap();
        assert_eq!(output.writer().len(), after_first + 2);
        // equal content, different allocation: a second object
        output.write_object(ObjectRef::Font(&twin)).unwrap();
        assert_eq!(output.objects_written(), 2);
        assert_eq!(output.references_written(), 1);

        let handle = output.handle_of(ObjectRef::Font(&twin)).unwrap();
        assert_eq!(
            handle,
            ObjectHandle {
                stream: 1,
                tag: TAG_FONT,
                index: 1
            }
        );
    }

    #[test]
    fn nested_objects_register_before_their_parent() {
        let registry = SerializerRegistry::with_defaults();
        let style = Arc::new(ElementStyle::default());
        let mut output = ObjectOutput::new(2, &registry);
        output.write_object(ObjectRef::Style(&style)).unwrap();
        let font_handle = output.handle_of(ObjectRef::Font(&style.font)).unwrap();
        let style_handle = output.handle_of(ObjectRef::Style(&style)).unwrap();
        assert_eq!(font_handle.index, 0);
        assert_eq!(style_handle.index, 0);
        assert_eq!(output.objects_written(), 2);
    }
}
