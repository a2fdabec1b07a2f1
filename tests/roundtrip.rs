use pretty_assertions::assert_eq;
use proptest::prelude::*;
use statetree::statics::ids;
use statetree::{DynamicValue, TreeNode};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn clip(start: f64, length: f64) -> TreeNode {
    let clip = TreeNode::new(ids::CLIP);
    clip.set_property(ids::START, start, None);
    clip.set_property(ids::LENGTH, length, None);
    clip
}

fn sample_edit() -> Result<TreeNode> {
    let edit = TreeNode::new(ids::EDIT);
    edit.set_property(ids::NAME, "Edit 1", None);
    let track = TreeNode::new(ids::TRACK);
    track.set_property(ids::COLOUR, "ff00ff00", None);
    edit.append_child(&track, None)?;
    track.append_child(&clip(0.0, 1.0), None)?;
    track.append_child(&clip(1.0, 1.0), None)?;
    Ok(edit)
}

/// Same tags, same property names in the same order, same printable values, same child order.
fn assert_same_printable(a: &TreeNode, b: &TreeNode) {
    assert_eq!(a.tag(), b.tag());
    let printable = |n: &TreeNode| -> Vec<(String, String)> {
        n.properties()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    assert_eq!(printable(a), printable(b));
    assert_eq!(a.num_children(), b.num_children());
    for (x, y) in a.children().iter().zip(b.children().iter()) {
        assert_same_printable(x, y);
    }
}

fn assert_same_exact(a: &TreeNode, b: &TreeNode) {
    assert_eq!(a.tag(), b.tag());
    assert_eq!(a.properties(), b.properties());
    assert_eq!(a.num_children(), b.num_children());
    for (x, y) in a.children().iter().zip(b.children().iter()) {
        assert_same_exact(x, y);
    }
}

#[test]
fn edit_survives_the_text_form() -> Result<()> {
    let edit = sample_edit()?;
    let xml = edit.to_xml_string()?;
    let back = TreeNode::from_xml(&xml)?;

    let track = back.child_with_tag(ids::TRACK).ok_or("missing track")?;
    assert_eq!(track.num_children(), 2);
    let starts: Vec<Option<f64>> = track
        .children()
        .iter()
        .map(|c| c.property(ids::START).as_f64())
        .collect();
    assert_eq!(starts, vec![Some(0.0), Some(1.0)]);
    assert_same_printable(&edit, &back);

    // Text form is stable once values have become strings.
    assert_eq!(back.to_xml_string()?, xml);
    Ok(())
}

#[test]
fn xml_layout_is_indented_elements_with_attributes() -> Result<()> {
    let xml = sample_edit()?.to_xml_string()?;
    let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<EDIT name="Edit 1">
  <TRACK colour="ff00ff00">
    <CLIP start="0.0" length="1.0"/>
    <CLIP start="1.0" length="1.0"/>
  </TRACK>
</EDIT>
"#;
    assert_eq!(xml, expected);
    Ok(())
}

#[test]
fn binary_preserves_every_subtype() -> Result<()> {
    let edit = sample_edit()?;
    let clip = edit.child(0).and_then(|t| t.child(1)).ok_or("missing clip")?;
    clip.set_property(ids::MEDIA_ID, 1_i64 << 42, None);
    clip.set_property("looped", true, None);
    clip.set_property(ids::IMAGE, vec![0_u8, 159, 146, 150], None);

    let back = TreeNode::from_binary(&edit.to_binary())?;
    assert_same_exact(&edit, &back);

    let back = TreeNode::from_binary(&edit.to_gzip_binary()?)?;
    assert_same_exact(&edit, &back);
    Ok(())
}

#[test]
fn gzip_output_is_reproducible() -> Result<()> {
    let edit = sample_edit()?;
    assert_eq!(edit.to_gzip_binary()?, edit.to_gzip_binary()?);
    Ok(())
}

#[test]
fn malformed_input_never_yields_a_partial_tree() -> Result<()> {
    let bytes = sample_edit()?.to_binary();
    for cut in [1, bytes.len() / 2, bytes.len() - 1] {
        assert!(TreeNode::from_binary(&bytes[..cut]).is_err(), "cut at {cut}");
    }
    assert!(TreeNode::from_xml("<EDIT><TRACK></EDIT>").is_err());
    assert!(TreeNode::from_xml("").is_err());
    Ok(())
}

#[test]
fn base64_prefixed_text_loads_as_a_string() -> Result<()> {
    let clip = TreeNode::from_xml("<CLIP image=\"base64:!!\" name=\"base64:AQID\"/>")?;
    assert_eq!(clip.property(ids::IMAGE), DynamicValue::from("base64:!!"));
    assert_eq!(clip.property(ids::NAME), DynamicValue::from("base64:AQID"));
    assert_eq!(clip.property(ids::IMAGE).decode_or(vec![9_u8]), vec![9]);
    assert_eq!(clip.property(ids::NAME).decode_or(Vec::new()), vec![1_u8, 2, 3]);
    Ok(())
}

#[derive(Debug, Clone)]
struct Shape {
    tag: String,
    properties: Vec<(String, DynamicValue)>,
    children: Vec<Shape>,
}

fn build(shape: &Shape) -> TreeNode {
    let node = TreeNode::new(shape.tag.as_str());
    for (name, value) in &shape.properties {
        node.set_property(name.as_str(), value.clone(), None);
    }
    for child in &shape.children {
        node.append_child(&build(child), None)
            .expect("fresh child attaches");
    }
    node
}

fn value_strategy() -> impl Strategy<Value = DynamicValue> {
    prop_oneof![
        Just(DynamicValue::Void),
        any::<bool>().prop_map(DynamicValue::Bool),
        any::<i32>().prop_map(DynamicValue::Int),
        any::<i64>().prop_map(DynamicValue::Int64),
        (-1.0e12..1.0e12_f64).prop_map(DynamicValue::Double),
        "[a-zA-Z0-9 _.,:&<>'-]{0,12}".prop_map(DynamicValue::String),
        "base64:[a-zA-Z0-9+/=!]{0,8}".prop_map(DynamicValue::String),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(DynamicValue::Blob),
    ]
}

fn properties_strategy() -> impl Strategy<Value = Vec<(String, DynamicValue)>> {
    proptest::collection::vec(("[a-z][a-zA-Z0-9]{0,6}", value_strategy()), 0..5)
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = ("[A-Z][A-Z0-9_]{0,5}", properties_strategy()).prop_map(|(tag, properties)| Shape {
        tag,
        properties,
        children: Vec::new(),
    });
    leaf.prop_recursive(4, 32, 4, |inner| {
        (
            "[A-Z][A-Z0-9_]{0,5}",
            properties_strategy(),
            proptest::collection::vec(inner, 0..4),
        )
            .prop_map(|(tag, properties, children)| Shape {
                tag,
                properties,
                children,
            })
    })
}

proptest! {
    #[test]
    fn binary_roundtrip_is_exact(shape in shape_strategy()) {
        let tree = build(&shape);
        let back = TreeNode::from_binary(&tree.to_binary()).expect("binary parses");
        assert_same_exact(&tree, &back);
        prop_assert!(back.is_equivalent_to(&tree));

        let back = TreeNode::from_binary(&tree.to_gzip_binary().expect("gzip")).expect("gzip parses");
        prop_assert!(back.is_equivalent_to(&tree));
    }

    #[test]
    fn xml_roundtrip_keeps_printable_values(shape in shape_strategy()) {
        let tree = build(&shape);
        let back = TreeNode::from_xml(&tree.to_xml_string().expect("xml writes")).expect("xml parses");
        assert_same_printable(&tree, &back);
    }

    #[test]
    fn deep_copy_is_equivalent_but_independent(shape in shape_strategy()) {
        let tree = build(&shape);
        let copy = tree.deep_copy();
        prop_assert!(copy.is_equivalent_to(&tree));
        prop_assert_ne!(&copy, &tree);
        copy.set_property("extra", 1, None);
        prop_assert!(!copy.is_equivalent_to(&tree));
    }
}
