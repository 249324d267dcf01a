//! DZI descriptor document.
//!
//! # Example Output
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <Image TileSize="254" Overlap="1" Format="png" xmlns="http://schemas.microsoft.com/deepzoom/2009">
//! <Size Width="46920" Height="33600" />
//! </Image>
//! ```

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{DescriptorError, PyramidError};

use super::geometry::{level_count, PyramidGeometry};

/// XML namespace written on the `Image` element.
pub const DZI_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2009";

/// Contents of a `.dzi` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DziFile {
    pub tile_size: u32,
    pub overlap: u32,
    /// Tile file extension, e.g. `png`
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl DziFile {
    pub fn new(tile_size: u32, overlap: u32, format: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            tile_size,
            overlap,
            format: format.into(),
            width,
            height,
        }
    }

    /// Level holding the full resolution image.
    pub fn max_level(&self) -> u32 {
        level_count(self.width, self.height)
    }

    /// Geometry of the described pyramid.
    pub fn geometry(&self) -> Result<PyramidGeometry, PyramidError> {
        PyramidGeometry::new(self.tile_size, self.overlap, self.width, self.height)
    }

    /// Serialize the descriptor as UTF-8 XML.
    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <Image TileSize=\"{}\" Overlap=\"{}\" Format=\"{}\" xmlns=\"{DZI_NAMESPACE}\">\n\
             <Size Width=\"{}\" Height=\"{}\" />\n\
             </Image>\n",
            self.tile_size,
            self.overlap,
            escape(&self.format),
            self.width,
            self.height
        )
    }

    /// Parse a descriptor document.
    ///
    /// The root element must be `Image` carrying `TileSize`, `Overlap` and
    /// `Format`, with a `Size` descendant carrying `Width` and `Height`.
    /// Other elements and attributes are ignored.
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let mut reader = Reader::from_str(text);

        let (root, has_children) = loop {
            match reader.read_event().map_err(syntax_error)? {
                Event::Start(tag) => break (Element::read(&tag)?, true),
                Event::Empty(tag) => break (Element::read(&tag)?, false),
                Event::Eof => {
                    return Err(DescriptorError::Parse("document has no root element".to_string()));
                }
                _ => {}
            }
        };
        if root.local_name() != "Image" {
            return Err(DescriptorError::UnexpectedRoot { found: root.name });
        }

        let tile_size = root.number("Image", "TileSize")?;
        let overlap = root.number("Image", "Overlap")?;
        let format = root
            .attribute("Format")
            .ok_or(DescriptorError::MissingAttribute {
                element: "Image",
                attribute: "Format",
            })?
            .to_string();

        let size = if has_children { find_size(&mut reader)? } else { None };
        let size = size.ok_or(DescriptorError::MissingAttribute {
            element: "Size",
            attribute: "Width",
        })?;

        Ok(Self {
            tile_size,
            overlap,
            format,
            width: size.number("Size", "Width")?,
            height: size.number("Size", "Height")?,
        })
    }
}

/// A start tag with its unescaped attributes, keyed by local name.
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    fn read(tag: &BytesStart<'_>) -> Result<Self, DescriptorError> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in tag.attributes() {
            let attribute = attribute.map_err(|e| DescriptorError::Parse(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(syntax_error)?;
            attributes.push((key, value.into_owned()));
        }
        Ok(Self { name, attributes })
    }

    fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn number(&self, element: &'static str, attribute: &'static str) -> Result<u32, DescriptorError> {
        let value = self
            .attribute(attribute)
            .ok_or(DescriptorError::MissingAttribute { element, attribute })?;
        value
            .trim()
            .parse()
            .map_err(|_| DescriptorError::InvalidAttribute {
                attribute,
                value: value.to_string(),
            })
    }
}

/// First `Size` element below the root.
fn find_size(reader: &mut Reader<&[u8]>) -> Result<Option<Element>, DescriptorError> {
    loop {
        match reader.read_event().map_err(syntax_error)? {
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"Size" => {
                return Element::read(&tag).map(Some);
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn syntax_error(error: quick_xml::Error) -> DescriptorError {
    DescriptorError::Parse(error.to_string())
}
