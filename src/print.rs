use crate::clone::NodeId;
use crate::delayed::DelayedText;
use crate::types::{Color, Pt, Rect};
use crate::value::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct FontDescriptor {
    pub name: String,
    pub size: Pt,
    pub bold: bool,
    pub italic: bool,
}

impl FontDescriptor {
    pub fn new(name: impl Into<String>, size: f32) -> Self {
        Self {
            name: name.into(),
            size: Pt::from_f32(size),
            bold: false,
            italic: false,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }
}

impl Default for FontDescriptor {
    fn default() -> Self {
        Self::new("Helvetica", 10.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HAlign {
    Left,
    Center,
    Right,
    Justified,
}

/// Style shared by many print elements. Virtualization writes each distinct
/// style once per stream and references it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementStyle {
    pub font: Arc<FontDescriptor>,
    pub forecolor: Color,
    pub backcolor: Option<Color>,
    pub h_align: HAlign,
    pub padding: Pt,
    pub line_spacing: f32,
}

impl ElementStyle {
    pub fn with_font(font: Arc<FontDescriptor>) -> Self {
        Self {
            font,
            ..Self::default()
        }
    }
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            font: Arc::new(FontDescriptor::default()),
            forecolor: Color::BLACK,
            backcolor: None,
            h_align: HAlign::Left,
            padding: Pt::ZERO,
            line_spacing: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleImage {
    Clip,
    FillFrame,
    RetainShape,
    RealHeight,
    RealSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    TopDown,
    BottomUp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrintElementKind {
    Text {
        text: String,
        /// Set while a delayed evaluation slot is pending.
        delayed: Option<DelayedText>,
    },
    Image {
        data: Arc<ImageData>,
        scale: ScaleImage,
    },
    Line {
        direction: LineDirection,
    },
    Rectangle {
        radius: Pt,
    },
    Ellipse,
    Frame {
        children: Vec<PrintElement>,
    },
    Generic {
        type_name: String,
        parameters: Vec<(String, Value)>,
    },
}

/// A positioned output unit. Top-level bounds are page coordinates; frame
/// children are relative to their frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintElement {
    pub id: u64,
    pub origin: NodeId,
    pub bounds: Rect,
    pub style: Arc<ElementStyle>,
    pub kind: PrintElementKind,
}

impl PrintElement {
    pub fn new(origin: NodeId, bounds: Rect, style: Arc<ElementStyle>, kind: PrintElementKind) -> Self {
        Self {
            id: 0,
            origin,
            bounds,
            style,
            kind,
        }
    }

    pub fn offset(&mut self, dx: Pt, dy: Pt) {
        self.bounds = self.bounds.offset(dx, dy);
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            PrintElementKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn children(&self) -> &[PrintElement] {
        match &self.kind {
            PrintElementKind::Frame { children } => children,
            _ => &[],
        }
    }

    /// Depth-first visit of this element and every nested frame child.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut PrintElement)) {
        visit(self);
        if let PrintElementKind::Frame { children } = &mut self.kind {
            for child in children {
                child.walk_mut(visit);
            }
        }
    }

    pub fn find_mut(&mut self, id: u64) -> Option<&mut PrintElement> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.kind {
            PrintElementKind::Frame { children } => {
                children.iter_mut().find_map(|child| child.find_mut(id))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintPage {
    pub elements: Vec<PrintElement>,
}

impl PrintPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: PrintElement) {
        self.elements.push(element);
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn find_mut(&mut self, id: u64) -> Option<&mut PrintElement> {
        self.elements.iter_mut().find_map(|element| element.find_mut(id))
    }

    /// All text on the page in emission order, frames flattened.
    pub fn texts(&self) -> Vec<String> {
        fn collect(elements: &[PrintElement], out: &mut Vec<String>) {
            for element in elements {
                if let Some(text) = element.text() {
                    out.push(text.to_string());
                }
                collect(element.children(), out);
            }
        }
        let mut out = Vec::new();
        collect(&self.elements, &mut out);
        out
    }
}
