// Central place for format constants, defaults and well-known identifiers.

// Undo history defaults
pub const DEFAULT_MAX_UNDO_ACTIONS: usize = 30_000;
pub const DEFAULT_MIN_UNDO_TRANSACTIONS: usize = 30;

// State-queue handle registry is swept for dead targets once it grows past this.
pub const MIN_REGISTRY_SWEEP: usize = 16;

// Gzip magic: 1F 8B
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

// Binary form value markers. A zero-length value record means Void.
pub const MARKER_INT: u8 = 1;
pub const MARKER_BOOL_TRUE: u8 = 2;
pub const MARKER_BOOL_FALSE: u8 = 3;
pub const MARKER_DOUBLE: u8 = 4;
pub const MARKER_STRING: u8 = 5;
pub const MARKER_INT64: u8 = 6;
pub const MARKER_BLOB: u8 = 8;

// Guards against hostile inputs nesting deep enough to blow the stack.
pub const MAX_TREE_DEPTH: usize = 512;

// Text form
pub const XML_INDENT_CHAR: u8 = b' ';
pub const XML_INDENT_SIZE: usize = 2;
pub const XML_VERSION: &str = "1.0";
pub const XML_ENCODING: &str = "UTF-8";
pub const BASE64_PREFIX: &str = "base64:";

// File extensions used by format detection.
pub const EXT_XML: &str = "xml";
pub const EXT_GZ: &str = "gz";

// Format names used in error messages.
pub const FORMAT_XML: &str = "XML";
pub const FORMAT_BINARY: &str = "binary";

// Value type names for diagnostics.
pub const TYPE_VOID: &str = "void";
pub const TYPE_BOOL: &str = "bool";
pub const TYPE_INT: &str = "int";
pub const TYPE_INT64: &str = "int64";
pub const TYPE_DOUBLE: &str = "double";
pub const TYPE_STRING: &str = "String";
pub const TYPE_BLOB: &str = "BinaryData";

/// Well-known type tags and property names for edit/track/clip documents.
pub mod ids {
    pub const TREE: &str = "TREE";
    pub const EDIT: &str = "EDIT";
    pub const TRACK: &str = "TRACK";
    pub const CLIP: &str = "CLIP";
    pub const NOTE: &str = "NOTE";

    pub const UUID: &str = "uuid";
    pub const MEDIA_ID: &str = "mediaId";
    pub const NAME: &str = "name";
    pub const COLOUR: &str = "colour";
    pub const IMAGE: &str = "image";
    pub const START: &str = "start";
    pub const LENGTH: &str = "length";
    pub const TIMESTRETCH_OPTIONS: &str = "timestretchOptions";
    pub const PI: &str = "pi";
}
