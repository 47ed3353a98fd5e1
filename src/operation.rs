//! Operations: the typed attribute bag describing what a frame represents
//!
//! An [`Operation`] carries an interned [`OperationType`], a label, an optional
//! source location and an [`OperationMap`] of properties. Expensive enrichment
//! can be deferred with [`Operation::add_finalizer`]: finalizers run exactly
//! once, right before the operation is closed, and see a side table of "rich"
//! objects that are never serialized.
//!
//! # Example
//! ```
//! use trazo::operation::{Operation, OperationType};
//!
//! let mut op = Operation::new(OperationType::of("sql"), "SELECT orders");
//! op.put("rows", 12i64);
//! op.add_finalizer(|op, _rich| {
//!     let rows = op.props().get_int("rows").unwrap_or(0);
//!     op.put("empty", rows == 0);
//! });
//! op.finalize();
//! assert_eq!(op.props().get_bool("empty"), Some(false));
//! ```

use crate::attributes::{AttrValue, OperationMap};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Reserved property keys written by the engine itself
pub mod props {
    /// Set by instrumentation when the operation failed; blocks `discard`
    pub const EXCEPTION: &str = "exception";
    /// Marks the operation the trace's endpoint was derived from
    pub const ENDPOINT_SOURCE: &str = "endpoint-source";
    /// Set by the watchdog on the frame that was open too long
    pub const EXCEEDED_MAX_TIME: &str = "exceeded-max-time";
}

static TYPE_INTERNER: OnceLock<Mutex<FnvHashMap<String, OperationType>>> = OnceLock::new();

/// Interned category tag ("http", "sql", "jms-send", ...)
///
/// Equal names always share one allocation, so clones are pointer copies.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationType(Arc<str>);

impl OperationType {
    /// Look up (or create) the interned type for `name`
    pub fn of(name: &str) -> Self {
        let interner = TYPE_INTERNER.get_or_init(|| Mutex::new(FnvHashMap::default()));
        let mut table = interner.lock();
        if let Some(existing) = table.get(name) {
            return existing.clone();
        }
        let op_type = OperationType(Arc::from(name));
        table.insert(name.to_string(), op_type.clone());
        op_type
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationType({})", self.name())
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Where an operation was observed (class/function/line)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCodeLocation {
    pub class_name: String,
    pub method_name: String,
    pub line: u32,
}

impl SourceCodeLocation {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>, line: u32) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            line,
        }
    }
}

/// Objects available to finalizers but never stored in the trace
pub type RichProperties = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Deferred enrichment step, run once before the operation closes
pub type Finalizer = Box<dyn FnOnce(&mut Operation, &RichProperties) + Send + Sync>;

/// Attribute bag describing one unit of work
#[derive(Serialize)]
pub struct Operation {
    #[serde(rename = "type")]
    op_type: OperationType,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_code_location: Option<SourceCodeLocation>,
    props: OperationMap,
    #[serde(skip)]
    rich: RichProperties,
    #[serde(skip)]
    finalizers: Vec<Finalizer>,
}

impl Operation {
    pub fn new(op_type: OperationType, label: impl Into<String>) -> Self {
        Self {
            op_type,
            label: label.into(),
            source_code_location: None,
            props: OperationMap::new(),
            rich: RichProperties::new(),
            finalizers: Vec::new(),
        }
    }

    pub fn with_source(mut self, location: SourceCodeLocation) -> Self {
        self.source_code_location = Some(location);
        self
    }

    pub fn op_type(&self) -> &OperationType {
        &self.op_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn source_code_location(&self) -> Option<&SourceCodeLocation> {
        self.source_code_location.as_ref()
    }

    pub fn props(&self) -> &OperationMap {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut OperationMap {
        &mut self.props
    }

    /// Store a property (builder style)
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> &mut Self {
        self.props.put(key, value);
        self
    }

    /// Attach an object for finalizers only
    pub fn put_rich<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.rich.insert(key.into(), Arc::new(value));
    }

    pub fn rich(&self) -> &RichProperties {
        &self.rich
    }

    pub fn add_finalizer<F>(&mut self, finalizer: F)
    where
        F: FnOnce(&mut Operation, &RichProperties) + Send + Sync + 'static,
    {
        self.finalizers.push(Box::new(finalizer));
    }

    pub fn pending_finalizers(&self) -> usize {
        self.finalizers.len()
    }

    /// Run every pending finalizer, then drop the rich side table
    ///
    /// Finalizers registered by other finalizers run in the same call.
    /// Calling this twice is a no-op the second time.
    pub fn finalize(&mut self) {
        if self.finalizers.is_empty() {
            return;
        }
        let rich = std::mem::take(&mut self.rich);
        while !self.finalizers.is_empty() {
            let batch = std::mem::take(&mut self.finalizers);
            for finalizer in batch {
                finalizer(self, &rich);
            }
        }
    }

    /// Record a failure; frames carrying one cannot be discarded
    pub fn set_exception(&mut self, message: impl Into<String>) {
        self.props.put(props::EXCEPTION, message.into());
    }

    pub fn has_exception(&self) -> bool {
        self.props.contains_key(props::EXCEPTION)
    }

    pub fn is_endpoint_source(&self) -> bool {
        self.props.get_bool(props::ENDPOINT_SOURCE).unwrap_or(false)
    }

    pub fn set_endpoint_source(&mut self, is_source: bool) {
        if is_source {
            self.props.put(props::ENDPOINT_SOURCE, true);
        } else {
            self.props.remove(props::ENDPOINT_SOURCE);
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("op_type", &self.op_type)
            .field("label", &self.label)
            .field("source_code_location", &self.source_code_location)
            .field("props", &self.props)
            .field("rich_keys", &self.rich.keys().collect::<Vec<_>>())
            .field("pending_finalizers", &self.finalizers.len())
            .finish()
    }
}
