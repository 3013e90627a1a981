//! Crate-wide constants
//!
//! Single source of truth for default intervals, limits and the
//! naming conventions used for generated IDs and ports.

/// Default values for editor configuration
pub mod defaults {
    /// Maximum number of commands kept in the undo history
    pub const UNDO_HISTORY_LIMIT: usize = 100;
    /// Window in which successive moves of one operator merge into one undo entry
    pub const DRAG_COALESCE_MS: u64 = 500;
    /// Quiet period before a schema propagation request is sent
    pub const PROPAGATION_DEBOUNCE_MS: u64 = 100;
    /// Timeout for requests to the type-inference and metadata endpoints
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
}

/// Naming conventions for generated identifiers
pub mod naming {
    /// Infix between the operator type and the UUID in operator IDs
    pub const OPERATOR_ID_INFIX: &str = "-operator-";
    /// Prefix for link IDs
    pub const LINK_ID_PREFIX: &str = "link-";
    /// Prefix for input port IDs (followed by the port index)
    pub const INPUT_PORT_PREFIX: &str = "input-";
    /// Prefix for output port IDs (followed by the port index)
    pub const OUTPUT_PORT_PREFIX: &str = "output-";
}

/// JSON schema keywords used for upstream attribute autofill
pub mod schema_keys {
    /// Marks a property whose value names an upstream attribute
    pub const AUTOFILL: &str = "autofill";
    /// Input port index the autofill reads attributes from
    pub const AUTOFILL_PORT: &str = "autofillAttributeOnPort";
    /// Autofill kind for a single attribute name
    pub const ATTRIBUTE_NAME: &str = "attributeName";
    /// Autofill kind for a list of attribute names
    pub const ATTRIBUTE_NAME_LIST: &str = "attributeNameList";
}
