//! Text form: one element per node, one attribute per property.
//!
//! Attribute values are printable forms and every one of them reads back as a string. Blobs are
//! written as `base64:` followed by the encoded bytes.

use crate::error::{Result, TreeError};
use crate::statics::{self, FORMAT_XML, MAX_TREE_DEPTH};
use crate::{DynamicValue, Identifier, TreeNode};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;

impl TreeNode {
    /// The subtree as an indented XML document with declaration.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.write_xml(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| TreeError::malformed(FORMAT_XML, e.to_string()))
    }

    pub fn write_xml<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, statics::XML_INDENT_CHAR, statics::XML_INDENT_SIZE);
        writer.write_event(Event::Decl(BytesDecl::new(
            statics::XML_VERSION,
            Some(statics::XML_ENCODING),
            None,
        )))?;
        write_element(&mut writer, self)?;
        writer.get_mut().write_all(b"\n")?;
        Ok(())
    }

    /// Parses a document produced by [`TreeNode::to_xml_string`] (or any XML with a single root
    /// element). Text content, comments and processing instructions are ignored.
    pub fn from_xml(text: &str) -> Result<TreeNode> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<TreeNode> = Vec::new();
        let mut root: Option<TreeNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if stack.len() >= MAX_TREE_DEPTH {
                        return Err(TreeError::malformed(FORMAT_XML, "tree is nested too deeply"));
                    }
                    stack.push(node_from_element(&start)?);
                }
                Event::Empty(start) => {
                    let node = node_from_element(&start)?;
                    attach(&stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| TreeError::malformed(FORMAT_XML, "unexpected closing tag"))?;
                    attach(&stack, &mut root, node)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(TreeError::malformed(FORMAT_XML, "unclosed element at end of input"));
        }
        root.ok_or_else(|| TreeError::malformed(FORMAT_XML, "no root element"))
    }
}

fn write_element<W: Write>(writer: &mut Writer<W>, node: &TreeNode) -> Result<()> {
    let tag = node.tag();
    let mut start = BytesStart::new(tag.as_str());
    for (name, value) in node.properties() {
        let text = value.to_attribute_text();
        start.push_attribute((name.as_str(), text.as_str()));
    }

    let children = node.children();
    if children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(())
}

fn node_from_element(element: &BytesStart) -> Result<TreeNode> {
    let tag = std::str::from_utf8(element.name().as_ref())
        .map_err(|e| TreeError::malformed(FORMAT_XML, e.to_string()))?
        .to_owned();
    let node = TreeNode::new(tag);

    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let name = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| TreeError::malformed(FORMAT_XML, e.to_string()))?;
        let text = attribute.unescape_value().map_err(quick_xml::Error::from)?;
        node.insert_property_unchecked(
            Identifier::new(name),
            DynamicValue::from_attribute_text(&text),
        );
    }
    Ok(node)
}

fn attach(stack: &[TreeNode], root: &mut Option<TreeNode>, node: TreeNode) -> Result<()> {
    match stack.last() {
        Some(parent) => parent.push_child_unchecked(node),
        None if root.is_some() => {
            return Err(TreeError::malformed(FORMAT_XML, "more than one root element"));
        }
        None => *root = Some(node),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::statics::ids;
    use crate::{DynamicValue, TreeError, TreeNode};
    use pretty_assertions::assert_eq;

    #[test]
    fn leaf_nodes_are_written_as_empty_elements() {
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::NAME, "a & b", None);
        let xml = clip.to_xml_string().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<CLIP name=\"a &amp; b\"/>"));
    }

    #[test]
    fn attributes_come_back_as_strings() {
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, 42.0, None);
        clip.set_property(ids::IMAGE, vec![1_u8, 2, 3], None);
        let back = TreeNode::from_xml(&clip.to_xml_string().unwrap()).unwrap();
        assert_eq!(back.property(ids::START), DynamicValue::from("42.0"));
        assert_eq!(back.property(ids::IMAGE), DynamicValue::from("base64:AQID"));
        assert_eq!(back.property(ids::IMAGE).decode_or(Vec::new()), vec![1_u8, 2, 3]);
    }

    #[test]
    fn strings_that_look_like_blobs_stay_strings() {
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::NAME, "base64:not a blob!", None);
        clip.set_property(ids::MEDIA_ID, "base64:AQID", None);
        let back = TreeNode::from_xml(&clip.to_xml_string().unwrap()).unwrap();
        assert_eq!(back.property(ids::NAME), DynamicValue::from("base64:not a blob!"));
        assert_eq!(back.property(ids::MEDIA_ID), DynamicValue::from("base64:AQID"));
        assert!(back.is_equivalent_to(&clip));
    }

    #[test]
    fn documents_without_a_root_are_rejected() {
        let err = TreeNode::from_xml("<?xml version=\"1.0\"?>").unwrap_err();
        assert!(matches!(err, TreeError::Malformed { .. }));
        assert!(TreeNode::from_xml("<A/><B/>").is_err());
        assert!(TreeNode::from_xml("<A><B></A>").is_err());
    }
}
