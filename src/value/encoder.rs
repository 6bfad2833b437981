//! The `ValueEncoder` visitor
//!
//! A concrete encoder implements one hook per value shape; the default
//! [`ValueEncoder::convert_value`] dispatches to them. Hooks never mutate
//! the input. Two orthogonal filters in [`EncodeOptions`] decide which
//! object keys and which sequence elements are visited, which is how the
//! local and non-local projections of a document share one traversal.
//!
//! Custom-serializable values ([`Encodable`]) write their fields into a
//! fresh sub-encoder of the same concrete type, so nested structures use the
//! same wire conventions as the enclosing value.

use super::{CoreKey, CoreValue, SharedValue};
use crate::error::EncodeError;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Receives the fields of an [`Encodable`] value
pub trait FieldSink {
    /// Record one field
    fn set(&mut self, key: &str, value: &CoreValue) -> Result<(), EncodeError>;
}

/// A value that knows how to serialize itself field by field
///
/// # Example
///
/// ```rust
/// use richsync_core::value::{CoreValue, Encodable, FieldSink, JsonEncoder, ValueEncoder};
/// use richsync_core::EncodeError;
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Point { x: f64, y: f64 }
///
/// impl Encodable for Point {
///     fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
///         sink.set("x", &CoreValue::from(self.x))?;
///         sink.set("y", &CoreValue::from(self.y))
///     }
/// }
///
/// let json = JsonEncoder::default()
///     .encode(&CoreValue::Encodable(Arc::new(Point { x: 1.0, y: 2.0 })))
///     .unwrap();
/// assert_eq!(json["__t"], "E");
/// assert_eq!(json["__v"]["y"], 2);
/// ```
pub trait Encodable: Send + Sync + fmt::Debug {
    fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError>;
}

impl Encodable for IndexMap<String, CoreValue> {
    fn serialize(&self, sink: &mut dyn FieldSink) -> Result<(), EncodeError> {
        for (key, value) in self {
            sink.set(key, value)?;
        }
        Ok(())
    }
}

type KeyFilter = dyn Fn(&str) -> bool + Send + Sync;
type ItemFilter = dyn Fn(&CoreValue) -> bool + Send + Sync;

/// Key and element filters applied during traversal
#[derive(Clone, Default)]
pub struct EncodeOptions {
    key_filter: Option<Arc<KeyFilter>>,
    iterable_filter: Option<Arc<ItemFilter>>,
}

impl EncodeOptions {
    /// Visit every key and every element
    pub fn new() -> Self {
        Self::default()
    }

    /// Projection without replica-local content
    ///
    /// Sequence elements that are objects flagged `isLocal: true` are
    /// skipped, along with everything below them.
    pub fn only_non_local() -> Self {
        Self::new().with_iterable_filter(|value| !value.is_local())
    }

    /// Only visit object keys for which `filter` returns true
    pub fn with_key_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.key_filter = Some(Arc::new(filter));
        self
    }

    /// Only visit sequence elements for which `filter` returns true
    pub fn with_iterable_filter(
        mut self,
        filter: impl Fn(&CoreValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.iterable_filter = Some(Arc::new(filter));
        self
    }

    pub fn include_key(&self, key: &str) -> bool {
        self.key_filter.as_ref().map_or(true, |f| f(key))
    }

    pub fn include_item(&self, value: &CoreValue) -> bool {
        self.iterable_filter.as_ref().map_or(true, |f| f(value))
    }

    /// Elements of a sequence that pass the iterable filter
    pub fn items<'a>(&'a self, items: &'a [CoreValue]) -> impl Iterator<Item = &'a CoreValue> + 'a {
        items.iter().filter(move |v| self.include_item(v))
    }

    /// Entries of an object that pass the key filter
    pub fn entries<'a>(
        &'a self,
        map: &'a IndexMap<String, CoreValue>,
    ) -> impl Iterator<Item = (&'a String, &'a CoreValue)> + 'a {
        map.iter().filter(move |(k, _)| self.include_key(k))
    }
}

impl fmt::Debug for EncodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeOptions")
            .field("key_filter", &self.key_filter.is_some())
            .field("iterable_filter", &self.iterable_filter.is_some())
            .finish()
    }
}

/// Shared cells currently being visited, innermost last
///
/// Each entry remembers the container nesting level it was pushed at, so a
/// back-reference can be described by how many containers it sits below
/// its target. That count does not depend on which cells along the path
/// are shared, so it survives a round trip through the cyclic codec.
///
/// Sub-encoders share their parent's stack so a cycle that passes through
/// an [`Encodable`] is still detected.
#[derive(Debug, Clone, Default)]
pub struct VisitStack(Rc<RefCell<VisitFrames>>);

#[derive(Debug, Default)]
struct VisitFrames {
    cells: Vec<(usize, usize)>,
    level: usize,
}

impl VisitStack {
    pub fn contains(&self, cell: &SharedValue) -> bool {
        let id = cell.id();
        self.0.borrow().cells.iter().any(|&(v, _)| v == id)
    }

    /// Containers entered since `cell` was pushed, if it is being visited
    pub fn span(&self, cell: &SharedValue) -> Option<usize> {
        let frames = self.0.borrow();
        let id = cell.id();
        frames
            .cells
            .iter()
            .rev()
            .find(|&&(v, _)| v == id)
            .map(|&(_, level)| frames.level - level)
    }

    pub fn push(&self, cell: &SharedValue) {
        let mut frames = self.0.borrow_mut();
        let level = frames.level;
        frames.cells.push((cell.id(), level));
    }

    pub fn pop(&self) {
        self.0.borrow_mut().cells.pop();
    }

    /// Mark the start of a container's children
    pub fn enter(&self) {
        self.0.borrow_mut().level += 1;
    }

    pub fn leave(&self) {
        let mut frames = self.0.borrow_mut();
        frames.level = frames.level.saturating_sub(1);
    }
}

/// Visitor converting [`CoreValue`]s into an encoder-specific output
pub trait ValueEncoder: FieldSink + Sized {
    /// Result of converting one value
    type Output;

    /// Fields collected by a sub-encoder from an [`Encodable`]
    type Fields;

    fn options(&self) -> &EncodeOptions;

    fn visiting(&self) -> &VisitStack;

    /// A fresh encoder of the same type and options, for an [`Encodable`]
    fn new_encoder(&self) -> Self;

    /// Hand back the fields collected through [`FieldSink::set`]
    fn finish(self) -> Self::Fields;

    fn convert_undefined(&mut self) -> Result<Self::Output, EncodeError>;
    fn convert_null(&mut self) -> Result<Self::Output, EncodeError>;
    fn convert_bool(&mut self, value: bool) -> Result<Self::Output, EncodeError>;
    fn convert_number(&mut self, value: f64) -> Result<Self::Output, EncodeError>;
    fn convert_string(&mut self, value: &str) -> Result<Self::Output, EncodeError>;
    fn convert_date(&mut self, value: &chrono::DateTime<chrono::Utc>) -> Result<Self::Output, EncodeError>;
    fn convert_array(&mut self, items: &[CoreValue]) -> Result<Self::Output, EncodeError>;
    fn convert_set(&mut self, items: &[CoreValue]) -> Result<Self::Output, EncodeError>;
    fn convert_object(&mut self, map: &IndexMap<String, CoreValue>) -> Result<Self::Output, EncodeError>;
    fn convert_dictionary(&mut self, map: &IndexMap<CoreKey, CoreValue>) -> Result<Self::Output, EncodeError>;
    fn convert_encodable(&mut self, fields: Self::Fields) -> Result<Self::Output, EncodeError>;

    /// Convert the content of a shared cell
    ///
    /// The default rejects cycles and otherwise encodes the cell's value
    /// in place.
    fn convert_shared(&mut self, cell: &SharedValue) -> Result<Self::Output, EncodeError> {
        if self.visiting().contains(cell) {
            return Err(EncodeError::Cycle);
        }
        self.visit_shared(cell)
    }

    /// Convert a cell's value with the cell pushed on the visit stack
    fn visit_shared(&mut self, cell: &SharedValue) -> Result<Self::Output, EncodeError> {
        let inner = cell.read().clone();
        self.visiting().push(cell);
        let result = self.convert_value(&inner);
        self.visiting().pop();
        result
    }

    /// Dispatch on the value's shape
    fn convert_value(&mut self, value: &CoreValue) -> Result<Self::Output, EncodeError> {
        match value {
            CoreValue::Undefined => self.convert_undefined(),
            CoreValue::Null => self.convert_null(),
            CoreValue::Bool(b) => self.convert_bool(*b),
            CoreValue::Number(n) => self.convert_number(*n),
            CoreValue::String(s) => self.convert_string(s),
            CoreValue::Date(d) => self.convert_date(d),
            CoreValue::Array(items) => self.convert_array(items),
            CoreValue::Set(items) => self.convert_set(items),
            CoreValue::Object(map) => self.convert_object(map),
            CoreValue::Dictionary(map) => self.convert_dictionary(map),
            CoreValue::Generator(seq) => {
                let items: Vec<CoreValue> = seq.iter().collect();
                self.convert_array(&items)
            }
            CoreValue::Encodable(obj) => {
                let mut sub = self.new_encoder();
                obj.serialize(&mut sub)?;
                let fields = sub.finish();
                self.convert_encodable(fields)
            }
            CoreValue::Shared(cell) => self.convert_shared(cell),
        }
    }
}

/// Walk every value reachable from `root` that the filters let through
///
/// Shared cells are reported to `on_shared` each time they are reached;
/// their content is only walked on the first visit (when `on_shared`
/// returns true), so cycles terminate.
pub(crate) fn walk(
    root: &CoreValue,
    options: &EncodeOptions,
    on_shared: &mut dyn FnMut(&SharedValue) -> bool,
) -> Result<(), EncodeError> {
    struct Walker<'a> {
        options: &'a EncodeOptions,
        on_shared: &'a mut dyn FnMut(&SharedValue) -> bool,
    }

    impl Walker<'_> {
        fn visit(&mut self, value: &CoreValue) -> Result<(), EncodeError> {
            let options = self.options;
            match value {
                CoreValue::Array(items) | CoreValue::Set(items) => {
                    for item in options.items(items) {
                        self.visit(item)?;
                    }
                }
                CoreValue::Generator(seq) => {
                    for item in seq.iter().filter(|v| options.include_item(v)) {
                        self.visit(&item)?;
                    }
                }
                CoreValue::Object(map) => {
                    for (_, item) in options.entries(map) {
                        self.visit(item)?;
                    }
                }
                CoreValue::Dictionary(map) => {
                    for item in map.values() {
                        self.visit(item)?;
                    }
                }
                CoreValue::Encodable(obj) => obj.serialize(self)?,
                CoreValue::Shared(cell) => {
                    if (self.on_shared)(cell) {
                        let inner = cell.read().clone();
                        self.visit(&inner)?;
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }

    impl FieldSink for Walker<'_> {
        fn set(&mut self, key: &str, value: &CoreValue) -> Result<(), EncodeError> {
            if self.options.include_key(key) {
                self.visit(value)?;
            }
            Ok(())
        }
    }

    Walker { options, on_shared }.visit(root)
}
