use std::fmt;

/// Why an `add_child` call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyViolation {
    /// The child already has a parent; detach it first.
    AlreadyAttached,
    /// The child is the parent itself or one of its ancestors.
    WouldCreateCycle,
}

impl fmt::Display for TopologyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyViolation::AlreadyAttached => f.write_str("child is already attached to a parent"),
            TopologyViolation::WouldCreateCycle => {
                f.write_str("child is the parent itself or one of its ancestors")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Structural mutation refused; the tree was left unmodified and no event fired.
    #[error("invalid topology: {0}")]
    InvalidTopology(TopologyViolation),

    /// Serialized input could not be turned into a tree.
    #[error("malformed {format} data: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeError {
    pub(crate) fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;
