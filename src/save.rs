use crate::{TreeNode, UndoManager, statics};
use anyhow::Context;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// On-disk representations of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFormat {
    Xml,
    Binary,
    GzipBinary,
}

impl TreeFormat {
    /// Picks a format from the file extension alone: `.xml`, `.gz`, anything else is binary.
    pub fn for_path(path: &Path) -> TreeFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(statics::EXT_XML) => TreeFormat::Xml,
            Some(ext) if ext.eq_ignore_ascii_case(statics::EXT_GZ) => TreeFormat::GzipBinary,
            _ => TreeFormat::Binary,
        }
    }

    pub fn encode(self, tree: &TreeNode) -> anyhow::Result<Vec<u8>> {
        let bytes = match self {
            TreeFormat::Xml => tree.to_xml_string().context("writing XML")?.into_bytes(),
            TreeFormat::Binary => tree.to_binary(),
            TreeFormat::GzipBinary => tree.to_gzip_binary().context("gzip compress")?,
        };
        Ok(bytes)
    }

    pub fn decode(self, bytes: &[u8]) -> anyhow::Result<TreeNode> {
        match self {
            TreeFormat::Xml => {
                let text = std::str::from_utf8(bytes).context("XML file is not valid UTF-8")?;
                TreeNode::from_xml(text).context("parsing XML")
            }
            TreeFormat::Binary | TreeFormat::GzipBinary => {
                TreeNode::from_binary(bytes).context("parsing binary tree")
            }
        }
    }
}

/// Sniffs the format of `bytes` read from `path`: gzip magic or a `.gz` extension means
/// compressed binary, a leading `<` or an `.xml` extension means XML, anything else is binary.
pub fn detect_format(path: &Path, bytes: &[u8]) -> TreeFormat {
    if bytes.starts_with(&statics::GZIP_MAGIC) {
        return TreeFormat::GzipBinary;
    }
    if bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<') {
        return TreeFormat::Xml;
    }
    TreeFormat::for_path(path)
}

pub fn try_load_tree(path: &Path) -> anyhow::Result<TreeNode> {
    let bytes = fs::read(path).with_context(|| format!("reading {path:?}"))?;
    detect_format(path, &bytes)
        .decode(&bytes)
        .with_context(|| format!("loading {path:?}"))
}

/// Loads a tree from any supported format. Failures are logged and yield `None`.
pub fn load_tree(path: &Path) -> Option<TreeNode> {
    match try_load_tree(path) {
        Ok(tree) => Some(tree),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = ?err, "could not load tree");
            None
        }
    }
}

/// Writes the tree to `path` by way of a temporary file in the same directory, so readers never
/// observe a half-written file.
pub fn try_save_tree(tree: &TreeNode, path: &Path, format: TreeFormat) -> anyhow::Result<()> {
    let bytes = format.encode(tree)?;
    write_atomically(path, &bytes)
}

/// Like [`try_save_tree`], logging failures instead of returning them.
pub fn save_tree(tree: &TreeNode, path: &Path, format: TreeFormat) -> bool {
    match try_save_tree(tree, path, format) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = ?err, "could not save tree");
            false
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {dir:?}"))?;
    tmp.write_all(bytes)
        .with_context(|| format!("writing temporary file for {path:?}"))?;
    tmp.as_file().sync_all().context("flushing temporary file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replacing {path:?}"))?;
    Ok(())
}

/// A tree bound to a file, with its own undo history.
///
/// Dirty tracking compares freshly generated bytes with those last loaded or saved, so undoing
/// back to the saved state makes the document clean again.
#[derive(Debug)]
pub struct TreeDocument {
    pub source_path: Option<PathBuf>,
    pub format: TreeFormat,
    saved_bytes: Vec<u8>,
    root: TreeNode,
    undo: UndoManager,
}

impl TreeDocument {
    /// An unsaved document. It is dirty until first saved.
    pub fn new(root: TreeNode, format: TreeFormat) -> Self {
        Self {
            source_path: None,
            format,
            saved_bytes: Vec::new(),
            root,
            undo: UndoManager::new(),
        }
    }

    pub fn load_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {path:?}"))?;
        let format = detect_format(path, &bytes);
        let root = format
            .decode(&bytes)
            .with_context(|| format!("loading {path:?}"))?;

        // Compare against regenerated bytes; the file itself may be formatted differently.
        let saved_bytes = format.encode(&root)?;
        tracing::debug!(path = %path.display(), ?format, "document loaded");

        Ok(Self {
            source_path: Some(path.to_path_buf()),
            format,
            saved_bytes,
            root,
            undo: UndoManager::new(),
        })
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn undo_manager(&self) -> &UndoManager {
        &self.undo
    }

    /// Swaps in a different tree. Listeners registered through [`TreeDocument::root`] follow the
    /// new tree and the undo history is cleared.
    pub fn replace_root(&mut self, new_root: TreeNode) {
        self.root.redirect_to(&new_root);
        self.undo.clear_undo_history();
    }

    pub fn bytes_for_format(&self, format: TreeFormat) -> anyhow::Result<Vec<u8>> {
        format.encode(&self.root)
    }

    pub fn is_dirty(&self) -> bool {
        match self.bytes_for_format(self.format) {
            Ok(current) => current != self.saved_bytes,
            Err(_) => true,
        }
    }

    /// Saves to `path`, choosing the format from its extension.
    pub fn save_to_path(&mut self, path: &Path) -> anyhow::Result<()> {
        let format = TreeFormat::for_path(path);
        let bytes = self.bytes_for_format(format)?;
        write_atomically(path, &bytes)?;

        tracing::debug!(path = %path.display(), ?format, "document saved");
        self.source_path = Some(path.to_path_buf());
        self.format = format;
        self.saved_bytes = bytes;
        Ok(())
    }

    /// Saves back to the file the document came from.
    pub fn save(&mut self) -> anyhow::Result<()> {
        let path = self
            .source_path
            .clone()
            .context("document has no file to save to")?;
        let bytes = self.bytes_for_format(self.format)?;
        write_atomically(&path, &bytes)?;
        self.saved_bytes = bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TreeFormat, detect_format};
    use std::path::Path;

    #[test]
    fn detect_format_uses_magic_before_extension() {
        let gz_magic = [0x1F_u8, 0x8B_u8, 0x08_u8, 0x00_u8];
        let xml = b"  <?xml version=\"1.0\"?><TREE/>";
        let binary = b"TREE\0\0\0";

        assert_eq!(
            detect_format(Path::new("state.bin"), &gz_magic),
            TreeFormat::GzipBinary
        );
        assert_eq!(detect_format(Path::new("state.dat"), xml), TreeFormat::Xml);
        assert_eq!(detect_format(Path::new("state.xml"), b""), TreeFormat::Xml);
        assert_eq!(detect_format(Path::new("state.bin"), binary), TreeFormat::Binary);
    }

    #[test]
    fn extension_picks_the_save_format() {
        assert_eq!(TreeFormat::for_path(Path::new("a.XML")), TreeFormat::Xml);
        assert_eq!(TreeFormat::for_path(Path::new("a.tree.gz")), TreeFormat::GzipBinary);
        assert_eq!(TreeFormat::for_path(Path::new("a.tree")), TreeFormat::Binary);
    }
}
