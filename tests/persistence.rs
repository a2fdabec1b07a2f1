use pretty_assertions::assert_eq;
use statetree::statics::ids;
use statetree::{
    CachedValue, DynamicValue, TreeDocument, TreeFormat, TreeListener, TreeNode, load_tree,
    save_tree, try_load_tree,
};
use std::{cell::Cell, fs, rc::Rc};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn sample_edit() -> Result<TreeNode> {
    let edit = TreeNode::new(ids::EDIT);
    edit.set_property(ids::NAME, "Edit 1", None);
    let track = TreeNode::new(ids::TRACK);
    edit.append_child(&track, None)?;
    for start in [0.0, 1.0] {
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, start, None);
        clip.set_property(ids::LENGTH, 1.0, None);
        track.append_child(&clip, None)?;
    }
    Ok(edit)
}

#[test]
fn xml_files_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("edit.xml");
    let edit = sample_edit()?;

    assert!(save_tree(&edit, &path, TreeFormat::Xml));
    let text = fs::read_to_string(&path)?;
    assert!(text.starts_with("<?xml"));

    let back = load_tree(&path).ok_or("load failed")?;
    assert_eq!(back.property(ids::NAME).as_str(), Some("Edit 1"));
    let track = back.child_with_tag(ids::TRACK).ok_or("missing track")?;
    assert_eq!(track.num_children(), 2);
    assert_eq!(
        track.child(1).map(|c| c.property(ids::START).as_f64()),
        Some(Some(1.0))
    );
    Ok(())
}

#[test]
fn compressed_files_round_trip_exactly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let edit = sample_edit()?;
    edit.set_property(ids::IMAGE, vec![1_u8, 2, 3], None);

    for name in ["edit.gz", "edit.bin"] {
        let path = dir.path().join(name);
        let format = TreeFormat::for_path(&path);
        assert!(save_tree(&edit, &path, format));
        let back = try_load_tree(&path)?;
        assert!(back.is_equivalent_to(&edit), "{name}");
        assert_eq!(back.property(ids::IMAGE), DynamicValue::Blob(vec![1, 2, 3]));
    }
    Ok(())
}

#[test]
fn content_wins_over_the_extension_when_loading() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("misnamed.bin");
    fs::write(&path, "<EDIT name=\"x\"/>")?;
    let tree = load_tree(&path).ok_or("load failed")?;
    assert_eq!(tree.property(ids::NAME).as_str(), Some("x"));
    Ok(())
}

#[test]
fn missing_or_malformed_files_load_as_none() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(load_tree(&dir.path().join("absent.xml")).is_none());

    let broken = dir.path().join("broken.xml");
    fs::write(&broken, "<EDIT><TRACK>")?;
    assert!(load_tree(&broken).is_none());
    assert!(try_load_tree(&broken).is_err());

    let truncated = dir.path().join("truncated.bin");
    let bytes = sample_edit()?.to_binary();
    fs::write(&truncated, &bytes[..bytes.len() / 2])?;
    assert!(load_tree(&truncated).is_none());
    Ok(())
}

#[test]
fn saving_into_a_missing_directory_fails_cleanly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("no").join("such").join("edit.xml");
    assert!(!save_tree(&sample_edit()?, &path, TreeFormat::Xml));
    assert!(!path.exists());
    Ok(())
}

#[test]
fn documents_track_dirtiness_through_undo() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("edit.xml");
    assert!(save_tree(&sample_edit()?, &path, TreeFormat::Xml));

    let doc = TreeDocument::load_path(&path)?;
    assert_eq!(doc.format, TreeFormat::Xml);
    assert!(!doc.is_dirty());

    let um = doc.undo_manager().clone();
    doc.root().set_property(ids::NAME, "Renamed", Some(&um));
    assert!(doc.is_dirty());

    assert!(um.undo());
    assert!(!doc.is_dirty());
    Ok(())
}

#[test]
fn documents_save_in_the_format_of_the_new_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut doc = TreeDocument::new(sample_edit()?, TreeFormat::Xml);
    assert!(doc.is_dirty());
    assert!(doc.save().is_err());

    let gz = dir.path().join("edit.gz");
    doc.save_to_path(&gz)?;
    assert_eq!(doc.format, TreeFormat::GzipBinary);
    assert_eq!(doc.source_path.as_deref(), Some(gz.as_path()));
    assert!(!doc.is_dirty());

    doc.root().set_property(ids::NAME, "Saved twice", None);
    doc.save()?;
    let reloaded = TreeDocument::load_path(&gz)?;
    assert_eq!(reloaded.format, TreeFormat::GzipBinary);
    assert!(reloaded.root().is_equivalent_to(doc.root()));
    Ok(())
}

#[derive(Default)]
struct RedirectCounter {
    redirects: Cell<usize>,
}

impl TreeListener for RedirectCounter {
    fn redirected(&self, _node: &TreeNode) {
        self.redirects.set(self.redirects.get() + 1);
    }
}

#[test]
fn replacing_the_root_moves_listeners_and_clears_history() -> Result<()> {
    let mut doc = TreeDocument::new(sample_edit()?, TreeFormat::Binary);
    let counter = Rc::new(RedirectCounter::default());
    doc.root().add_listener(&counter);
    let um = doc.undo_manager().clone();
    doc.root().set_property(ids::NAME, "Before", Some(&um));
    assert!(um.can_undo());

    let fresh = TreeNode::new(ids::EDIT);
    doc.replace_root(fresh.clone());
    assert_eq!(counter.redirects.get(), 1);
    assert_eq!(*doc.root(), fresh);
    // The counter and the document's undo manager.
    assert_eq!(fresh.num_listeners(), 2);
    assert!(!um.can_undo());
    Ok(())
}

#[test]
fn cached_views_follow_a_replaced_root() -> Result<()> {
    let mut doc = TreeDocument::new(sample_edit()?, TreeFormat::Binary);
    let name = CachedValue::<String>::bound(doc.root(), ids::NAME, None, String::new());
    assert_eq!(name.get(), "Edit 1");

    let fresh = TreeNode::new(ids::EDIT);
    fresh.set_property(ids::NAME, "Edit 2", None);
    doc.replace_root(fresh.clone());
    assert_eq!(name.get(), "Edit 2");

    name.set("Renamed".to_owned());
    assert_eq!(doc.root().property(ids::NAME).as_str(), Some("Renamed"));
    Ok(())
}
