//! XML snapshot encoding.
//!
//! ```xml
//! <node name="article" primaryType="site:article">
//!   <property name="site:title" type="STRING" multiple="false">
//!     <value>Hello</value>
//!   </property>
//!   <node name="body" primaryType="site:html"/>
//! </node>
//! ```
//!
//! Text inside `<value>` is kept verbatim (no trimming); whitespace between
//! elements is ignored. Empty strings are written as `<value/>` so indentation
//! never leaks into a value.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{CoreError, Result};
use crate::model::property::PropertyRepr;
use crate::model::{ContentNode, ContentProperty, PropertyType};

const DATA_TYPE: &str = "XML snapshot";

fn xml_error(details: impl ToString) -> CoreError {
    CoreError::invalid_format(DATA_TYPE, details.to_string())
}

pub(super) fn to_string(node: &ContentNode) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    write_node(&mut writer, node)?;
    let mut text = String::from_utf8(writer.into_inner()).map_err(xml_error)?;
    text.push('\n');
    Ok(text)
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &ContentNode) -> Result<()> {
    let mut start = BytesStart::new("node");
    start.push_attribute(("name", node.name()));
    start.push_attribute(("primaryType", node.primary_type()));

    if node.properties().is_empty() && node.children().is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(xml_error);
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for property in node.properties() {
        write_property(writer, property)?;
    }
    for child in node.children() {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("node")))
        .map_err(xml_error)
}

fn write_property(writer: &mut Writer<Vec<u8>>, property: &ContentProperty) -> Result<()> {
    let mut start = BytesStart::new("property");
    start.push_attribute(("name", property.name()));
    start.push_attribute(("type", property.property_type().as_str()));
    start.push_attribute((
        "multiple",
        if property.is_multiple() { "true" } else { "false" },
    ));

    if property.values().is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(xml_error);
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for value in property.values() {
        let lexical = value.to_lexical();
        if lexical.is_empty() {
            writer
                .write_event(Event::Empty(BytesStart::new("value")))
                .map_err(xml_error)?;
        } else {
            writer
                .write_event(Event::Start(BytesStart::new("value")))
                .map_err(xml_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&lexical)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new("value")))
                .map_err(xml_error)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("property")))
        .map_err(xml_error)
}

struct PartialNode {
    name: String,
    primary_type: String,
    properties: Vec<ContentProperty>,
    children: Vec<ContentNode>,
}

impl PartialNode {
    fn from_start(start: &BytesStart) -> Result<Self> {
        let mut attributes = read_attributes(start)?;
        Ok(Self {
            name: take_attribute(&mut attributes, "node", "name")?,
            primary_type: take_attribute(&mut attributes, "node", "primaryType")?,
            properties: Vec::new(),
            children: Vec::new(),
        })
    }

    fn finish(self) -> Result<ContentNode> {
        Ok(ContentNode::from_parts(
            self.name,
            self.primary_type,
            self.properties,
            self.children,
        )?)
    }
}

struct PartialProperty {
    name: String,
    ty: PropertyType,
    multiple: bool,
    values: Vec<String>,
}

impl PartialProperty {
    fn from_start(start: &BytesStart) -> Result<Self> {
        let mut attributes = read_attributes(start)?;
        let name = take_attribute(&mut attributes, "property", "name")?;
        let ty = take_attribute(&mut attributes, "property", "type")?.parse::<PropertyType>()?;
        let multiple = match take_attribute(&mut attributes, "property", "multiple")?.as_str() {
            "true" => true,
            "false" => false,
            other => {
                return Err(xml_error(format!(
                    "property '{}' has invalid multiple flag '{}'",
                    name, other
                )));
            }
        };
        Ok(Self {
            name,
            ty,
            multiple,
            values: Vec::new(),
        })
    }

    fn finish(self) -> Result<ContentProperty> {
        let repr = PropertyRepr {
            name: self.name,
            ty: self.ty,
            multiple: self.multiple,
            values: self.values,
        };
        Ok(ContentProperty::try_from(repr)?)
    }
}

fn read_attributes(start: &BytesStart) -> Result<HashMap<String, String>> {
    let mut attributes = HashMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        attributes.insert(key, value);
    }
    Ok(attributes)
}

fn take_attribute(
    attributes: &mut HashMap<String, String>,
    element: &str,
    name: &str,
) -> Result<String> {
    attributes
        .remove(name)
        .ok_or_else(|| xml_error(format!("<{}> is missing the '{}' attribute", element, name)))
}

/// Decoder state: open nodes, the open property and the open value.
#[derive(Default)]
struct Decoder {
    stack: Vec<PartialNode>,
    property: Option<PartialProperty>,
    value: Option<String>,
    root: Option<ContentNode>,
}

impl Decoder {
    fn attach(&mut self, node: ContentNode) -> Result<()> {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if self.root.is_none() => self.root = Some(node),
            None => return Err(xml_error("document has more than one root <node>")),
        }
        Ok(())
    }

    fn open_property(&mut self, property: PartialProperty) -> Result<()> {
        if self.stack.is_empty() || self.property.is_some() {
            return Err(xml_error("<property> must appear directly inside a <node>"));
        }
        self.property = Some(property);
        Ok(())
    }

    fn close_property(&mut self) -> Result<()> {
        let property = self
            .property
            .take()
            .ok_or_else(|| xml_error("unbalanced </property>"))?
            .finish()?;
        self.push_property(property)
    }

    fn push_property(&mut self, property: ContentProperty) -> Result<()> {
        match self.stack.last_mut() {
            Some(node) => {
                node.properties.push(property);
                Ok(())
            }
            None => Err(xml_error("<property> outside of a <node>")),
        }
    }

    fn push_value(&mut self, value: String) -> Result<()> {
        match self.property.as_mut() {
            Some(property) => {
                property.values.push(value);
                Ok(())
            }
            None => Err(xml_error("<value> outside of a <property>")),
        }
    }
}

pub(super) fn from_str(text: &str) -> Result<ContentNode> {
    let mut reader = Reader::from_str(text);
    let mut decoder = Decoder::default();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => match start.name().as_ref() {
                b"node" => {
                    if decoder.property.is_some() {
                        return Err(xml_error("<node> inside a <property>"));
                    }
                    decoder.stack.push(PartialNode::from_start(&start)?);
                }
                b"property" => decoder.open_property(PartialProperty::from_start(&start)?)?,
                b"value" => {
                    if decoder.property.is_none() || decoder.value.is_some() {
                        return Err(xml_error("<value> must appear directly inside a <property>"));
                    }
                    decoder.value = Some(String::new());
                }
                other => {
                    return Err(xml_error(format!(
                        "unexpected element <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::Empty(start) => match start.name().as_ref() {
                b"node" => {
                    let node = PartialNode::from_start(&start)?.finish()?;
                    decoder.attach(node)?;
                }
                b"property" => {
                    if decoder.property.is_some() {
                        return Err(xml_error("nested <property>"));
                    }
                    let property = PartialProperty::from_start(&start)?.finish()?;
                    decoder.push_property(property)?;
                }
                b"value" => decoder.push_value(String::new())?,
                other => {
                    return Err(xml_error(format!(
                        "unexpected element <{}/>",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::End(end) => match end.name().as_ref() {
                b"node" => {
                    let node = decoder
                        .stack
                        .pop()
                        .ok_or_else(|| xml_error("unbalanced </node>"))?
                        .finish()?;
                    decoder.attach(node)?;
                }
                b"property" => decoder.close_property()?,
                b"value" => {
                    let value = decoder
                        .value
                        .take()
                        .ok_or_else(|| xml_error("unbalanced </value>"))?;
                    decoder.push_value(value)?;
                }
                _ => {}
            },
            Event::Text(content) => {
                if let Some(buffer) = decoder.value.as_mut() {
                    buffer.push_str(&content.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(content) => {
                if let Some(buffer) = decoder.value.as_mut() {
                    let raw = content.into_inner();
                    buffer.push_str(std::str::from_utf8(&raw).map_err(xml_error)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !decoder.stack.is_empty() {
        return Err(xml_error("unexpected end of document inside <node>"));
    }
    decoder
        .root
        .ok_or_else(|| xml_error("document has no root <node>"))
}
