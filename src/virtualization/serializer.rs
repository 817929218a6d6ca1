use super::input::ObjectInput;
use super::output::ObjectOutput;
use super::{ObjectRef, TAG_ARBITRARY, TAG_ELEMENT, TAG_FONT, TAG_IMAGE, TAG_NULL, TAG_REFERENCE, TAG_STYLE, VirtualObject};
use crate::clone::NodeId;
use crate::delayed::{DelayedText, EvaluationTime, TextSource};
use crate::error::FillError;
use crate::evaluator::ExpressionId;
use crate::print::{
    ElementStyle, FontDescriptor, HAlign, ImageData, LineDirection, PrintElement, PrintElementKind,
    ScaleImage,
};
use crate::types::Rect;
use std::collections::HashMap;
use std::sync::Arc;

/// Writes and reads the body of one object type. The tag byte and reference
/// bookkeeping are handled by [`ObjectOutput`] and [`ObjectInput`].
pub trait ObjectSerializer: Send + Sync {
    fn tag(&self) -> u8;

    /// Tracked objects are written once per stream and referenced afterwards.
    fn track_references(&self) -> bool {
        true
    }

    fn write(&self, output: &mut ObjectOutput<'_>, object: ObjectRef<'_>) -> Result<(), FillError>;

    fn read(&self, input: &mut ObjectInput<'_>) -> Result<VirtualObject, FillError>;
}

pub struct SerializerRegistry {
    serializers: HashMap<u8, Arc<dyn ObjectSerializer>>,
}

impl SerializerRegistry {
    /// Registry without any type serializers; only null and arbitrary values
    /// can be written.
    pub fn new() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut serializers: HashMap<u8, Arc<dyn ObjectSerializer>> = HashMap::new();
        serializers.insert(TAG_FONT, Arc::new(FontSerializer));
        serializers.insert(TAG_STYLE, Arc::new(StyleSerializer));
        serializers.insert(TAG_IMAGE, Arc::new(ImageSerializer));
        serializers.insert(TAG_ELEMENT, Arc::new(ElementSerializer));
        Self { serializers }
    }

    /// Adds or replaces the serializer for its tag.
    pub fn register(&mut self, serializer: Arc<dyn ObjectSerializer>) -> Result<(), FillError> {
        let tag = serializer.tag();
        if tag == TAG_NULL || tag == TAG_ARBITRARY || tag & TAG_REFERENCE != 0 {
            return Err(FillError::InvalidConfiguration(format!(
                "tag {tag:#04x} is reserved"
            )));
        }
        self.serializers.insert(tag, serializer);
        Ok(())
    }

    pub fn get(&self, tag: u8) -> Option<&Arc<dyn ObjectSerializer>> {
        self.serializers.get(&tag)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn mismatch(expected: u8, object: &ObjectRef<'_>) -> FillError {
    FillError::InvalidConfiguration(format!(
        "serializer {expected:#04x} cannot write object {:#04x}",
        object.tag()
    ))
}

struct FontSerializer;

impl ObjectSerializer for FontSerializer {
    fn tag(&self) -> u8 {
        TAG_FONT
    }

    fn write(&self, output: &mut ObjectOutput<'_>, object: ObjectRef<'_>) -> Result<(), FillError> {
        let ObjectRef::Font(font) = object else {
            return Err(mismatch(TAG_FONT, &object));
        };
        let writer = output.writer();
        writer.write_str(&font.name);
        writer.write_pt(font.size);
        writer.write_bool(font.bold);
        writer.write_bool(font.italic);
        Ok(())
    }

    fn read(&self, input: &mut ObjectInput<'_>) -> Result<VirtualObject, FillError> {
        let reader = input.reader();
        let font = FontDescriptor {
            name: reader.read_string()?,
            size: reader.read_pt()?,
            bold: reader.read_bool()?,
            italic: reader.read_bool()?,
        };
        Ok(VirtualObject::Font(Arc::new(font)))
    }
}

struct StyleSerializer;

fn align_code(align: HAlign) -> u8 {
    match align {
        HAlign::Left => 0,
        HAlign::Center => 1,
        HAlign::Right => 2,
        HAlign::Justified => 3,
    }
}

impl ObjectSerializer for StyleSerializer {
    fn tag(&self) -> u8 {
        TAG_STYLE
    }

    fn write(&self, output: &mut ObjectOutput<'_>, object: ObjectRef<'_>) -> Result<(), FillError> {
        let ObjectRef::Style(style) = object else {
            return Err(mismatch(TAG_STYLE, &object));
        };
        output.write_object(ObjectRef::Font(&style.font))?;
        let writer = output.writer();
        writer.write_color(style.forecolor);
        match style.backcolor {
            Some(color) => {
                writer.write_bool(true);
                writer.write_color(color);
            }
            None => writer.write_bool(false),
        }
        writer.write_u8(align_code(style.h_align));
        writer.write_pt(style.padding);
        writer.write_f32(style.line_spacing);
        Ok(())
    }

    fn read(&self, input: &mut ObjectInput<'_>) -> Result<VirtualObject, FillError> {
        let font = input.read_font()?;
        let reader = input.reader();
        let forecolor = reader.read_color()?;
        let backcolor = if reader.read_bool()? {
            Some(reader.read_color()?)
        } else {
            None
        };
        let h_align = match reader.read_u8()? {
            0 => HAlign::Left,
            1 => HAlign::Center,
            2 => HAlign::Right,
            3 => HAlign::Justified,
            other => return Err(reader.malformed(format!("unknown alignment {other}"))),
        };
        let style = ElementStyle {
            font,
            forecolor,
            backcolor,
            h_align,
            padding: reader.read_pt()?,
            line_spacing: reader.read_f32()?,
        };
        Ok(VirtualObject::Style(Arc::new(style)))
    }
}

struct ImageSerializer;

impl ObjectSerializer for ImageSerializer {
    fn tag(&self) -> u8 {
        TAG_IMAGE
    }

    fn write(&self, output: &mut ObjectOutput<'_>, object: ObjectRef<'_>) -> Result<(), FillError> {
        let ObjectRef::Image(image) = object else {
            return Err(mismatch(TAG_IMAGE, &object));
        };
        output.writer().write_bytes(&image.bytes);
        Ok(())
    }

    fn read(&self, input: &mut ObjectInput<'_>) -> Result<VirtualObject, FillError> {
        let bytes = input.reader().read_bytes()?.to_vec();
        Ok(VirtualObject::Image(Arc::new(ImageData::new(bytes))))
    }
}

const KIND_TEXT: u8 = 0;
const KIND_IMAGE: u8 = 1;
const KIND_LINE: u8 = 2;
const KIND_RECTANGLE: u8 = 3;
const KIND_ELLIPSE: u8 = 4;
const KIND_FRAME: u8 = 5;
const KIND_GENERIC: u8 = 6;

/// Print elements are not shared between pages or parents, so they are never
/// tracked.
struct ElementSerializer;

impl ElementSerializer {
    fn write_delayed(output: &mut ObjectOutput<'_>, delayed: &DelayedText) -> Result<(), FillError> {
        let writer = output.writer();
        match &delayed.source {
            TextSource::Static(text) => {
                writer.write_u8(0);
                writer.write_str(text);
            }
            TextSource::Expression(id) => {
                writer.write_u8(1);
                writer.write_varint(u64::from(id.0));
            }
            TextSource::PageNumber => writer.write_u8(2),
            TextSource::PageCount => writer.write_u8(3),
        }
        match &delayed.time {
            EvaluationTime::Now => writer.write_u8(0),
            EvaluationTime::Page => writer.write_u8(1),
            EvaluationTime::Group(name) => {
                writer.write_u8(2);
                writer.write_str(name);
            }
            EvaluationTime::Report => writer.write_u8(3),
        }
        Ok(())
    }

    fn read_delayed(input: &mut ObjectInput<'_>) -> Result<DelayedText, FillError> {
        let reader = input.reader();
        let source = match reader.read_u8()? {
            0 => TextSource::Static(reader.read_string()?),
            1 => {
                let raw = reader.read_varint()?;
                let id = u32::try_from(raw)
                    .map_err(|_| reader.malformed(format!("expression id {raw} out of range")))?;
                TextSource::Expression(ExpressionId(id))
            }
            2 => TextSource::PageNumber,
            3 => TextSource::PageCount,
            other => return Err(reader.malformed(format!("unknown text source {other}"))),
        };
        let time = match reader.read_u8()? {
            0 => EvaluationTime::Now,
            1 => EvaluationTime::Page,
            2 => EvaluationTime::Group(reader.read_string()?),
            3 => EvaluationTime::Report,
            other => return Err(reader.malformed(format!("unknown evaluation time {other}"))),
        };
        Ok(DelayedText { source, time })
    }
}

impl ObjectSerializer for ElementSerializer {
    fn tag(&self) -> u8 {
        TAG_ELEMENT
    }

    fn track_references(&self) -> bool {
        false
    }

    fn write(&self, output: &mut ObjectOutput<'_>, object: ObjectRef<'_>) -> Result<(), FillError> {
        let ObjectRef::Element(element) = object else {
            return Err(mismatch(TAG_ELEMENT, &object));
        };
        {
            let writer = output.writer();
            writer.write_varint(element.id);
            writer.write_varint(u64::from(element.origin.raw()));
            writer.write_pt(element.bounds.x);
            writer.write_pt(element.bounds.y);
            writer.write_pt(element.bounds.width);
            writer.write_pt(element.bounds.height);
        }
        output.write_object(ObjectRef::Style(&element.style))?;

        match &element.kind {
            PrintElementKind::Text { text, delayed } => {
                let writer = output.writer();
                writer.write_u8(KIND_TEXT);
                writer.write_str(text);
                writer.write_bool(delayed.is_some());
                if let Some(delayed) = delayed {
                    Self::write_delayed(output, delayed)?;
                }
            }
            PrintElementKind::Image { data, scale } => {
                output.writer().write_u8(KIND_IMAGE);
                output.write_object(ObjectRef::Image(data))?;
                output.writer().write_u8(match scale {
                    ScaleImage::Clip => 0,
                    ScaleImage::FillFrame => 1,
                    ScaleImage::RetainShape => 2,
                    ScaleImage::RealHeight => 3,
                    ScaleImage::RealSize => 4,
                });
            }
            PrintElementKind::Line { direction } => {
                let writer = output.writer();
                writer.write_u8(KIND_LINE);
                writer.write_bool(*direction == LineDirection::BottomUp);
            }
            PrintElementKind::Rectangle { radius } => {
                let writer = output.writer();
                writer.write_u8(KIND_RECTANGLE);
                writer.write_pt(*radius);
            }
            PrintElementKind::Ellipse => output.writer().write_u8(KIND_ELLIPSE),
            PrintElementKind::Frame { children } => {
                let writer = output.writer();
                writer.write_u8(KIND_FRAME);
                writer.write_varint(children.len() as u64);
                for child in children {
                    output.write_object(ObjectRef::Element(child))?;
                }
            }
            PrintElementKind::Generic {
                type_name,
                parameters,
            } => {
                let writer = output.writer();
                writer.write_u8(KIND_GENERIC);
                writer.write_str(type_name);
                writer.write_varint(parameters.len() as u64);
                for (name, value) in parameters {
                    output.writer().write_str(name);
                    output.write_object(ObjectRef::Arbitrary(value))?;
                }
            }
        }
        Ok(())
    }

    fn read(&self, input: &mut ObjectInput<'_>) -> Result<VirtualObject, FillError> {
        let (id, origin, bounds) = {
            let reader = input.reader();
            let id = reader.read_varint()?;
            let raw_origin = reader.read_varint()?;
            let origin = u32::try_from(raw_origin)
                .map_err(|_| reader.malformed(format!("node id {raw_origin} out of range")))?;
            let bounds = Rect::new(
                reader.read_pt()?,
                reader.read_pt()?,
                reader.read_pt()?,
                reader.read_pt()?,
            );
            (id, NodeId::from_raw(origin), bounds)
        };
        let style = input.read_style()?;

        let kind = match input.reader().read_u8()? {
            KIND_TEXT => {
                let text = input.reader().read_string()?;
                let delayed = if input.reader().read_bool()? {
                    Some(Self::read_delayed(input)?)
                } else {
                    None
                };
                PrintElementKind::Text { text, delayed }
            }
            KIND_IMAGE => {
                let data = input.read_image()?;
                let reader = input.reader();
                let scale = match reader.read_u8()? {
                    0 => ScaleImage::Clip,
                    1 => ScaleImage::FillFrame,
                    2 => ScaleImage::RetainShape,
                    3 => ScaleImage::RealHeight,
                    4 => ScaleImage::RealSize,
                    other => return Err(reader.malformed(format!("unknown image scale {other}"))),
                };
                PrintElementKind::Image { data, scale }
            }
            KIND_LINE => PrintElementKind::Line {
                direction: if input.reader().read_bool()? {
                    LineDirection::BottomUp
                } else {
                    LineDirection::TopDown
                },
            },
            KIND_RECTANGLE => PrintElementKind::Rectangle {
                radius: input.reader().read_pt()?,
            },
            KIND_ELLIPSE => PrintElementKind::Ellipse,
            KIND_FRAME => {
                let count = input.reader().read_count()?;
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    children.push(input.read_element()?);
                }
                PrintElementKind::Frame { children }
            }
            KIND_GENERIC => {
                let type_name = input.reader().read_string()?;
                let count = input.reader().read_count()?;
                let mut parameters = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = input.reader().read_string()?;
                    parameters.push((name, input.read_value()?));
                }
                PrintElementKind::Generic {
                    type_name,
                    parameters,
                }
            }
            other => {
                return Err(input
                    .reader()
                    .malformed(format!("unknown element kind {other}")));
            }
        };

        Ok(VirtualObject::Element(PrintElement {
            id,
            origin,
            bounds,
            style,
            kind,
        }))
    }
}
