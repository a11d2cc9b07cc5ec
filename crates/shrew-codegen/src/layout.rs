//! Struct layout builder.
//!
//! Computes byte layouts for yielded values, combinator state and constructor
//! argument records. Fields are placed in declaration order, each at the next
//! offset aligned to its own alignment; struct alignment is the largest field
//! alignment and size is rounded up to it.
//!
//! Combinator state layouts are part of the compiled ABI:
//!
//! | kind        | layout                                  |
//! |-------------|-----------------------------------------|
//! | enumerate   | `{ count: i64 @0, source: ptr @8 }`     |
//! | zip (N)     | `{ source_0: ptr, .., source_{N-1}: ptr }` |
//! | generator   | opaque                                  |
//! | external    | opaque                                  |

use std::rc::Rc;

use cranelift::prelude::{FunctionBuilder, InstBuilder, MemFlags, Type, Value};
use rustc_hash::FxHashMap;

use crate::errors::{CodegenError, CodegenResult};
use crate::types::{IterKind, ScalarKind, ValueType};

/// Index of the counter field in enumerate state.
pub const ENUMERATE_COUNT: usize = 0;
/// Index of the source iterator field in enumerate state.
pub const ENUMERATE_SOURCE: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Scalar(ScalarKind),
    Struct(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: u32,
    pub layout: Layout,
}

fn align_to(offset: u32, align: u32) -> u32 {
    offset.div_ceil(align) * align
}

impl Layout {
    pub fn scalar(kind: ScalarKind, ptr_bytes: u32) -> Self {
        let size = kind.size(ptr_bytes);
        Self {
            size,
            align: size,
            shape: Shape::Scalar(kind),
        }
    }

    /// Lay out named fields in declaration order.
    pub fn record(fields: Vec<(String, Layout)>) -> Self {
        let mut offset = 0u32;
        let mut align = 1u32;
        let mut placed = Vec::with_capacity(fields.len());
        for (name, layout) in fields {
            offset = align_to(offset, layout.align);
            align = align.max(layout.align);
            let size = layout.size;
            placed.push(Field {
                name,
                offset,
                layout,
            });
            offset += size;
        }
        Self {
            size: align_to(offset, align),
            align,
            shape: Shape::Struct(placed),
        }
    }

    pub fn fields(&self) -> &[Field] {
        match &self.shape {
            Shape::Scalar(_) => &[],
            Shape::Struct(fields) => fields,
        }
    }

    pub fn field(&self, index: usize) -> CodegenResult<&Field> {
        self.fields().get(index).ok_or_else(|| {
            CodegenError::internal_with_context("field index out of range", index.to_string())
        })
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|field| field.name == name)
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.shape {
            Shape::Scalar(kind) => Some(kind),
            Shape::Struct(_) => None,
        }
    }

    /// Decode a value laid out by `self` from the start of `bytes`, or `None`
    /// when `bytes` is shorter than `self.size`.
    pub fn read(&self, bytes: &[u8]) -> Option<YieldValue> {
        let bytes = bytes.get(..self.size as usize)?;
        match &self.shape {
            Shape::Scalar(kind) => Some(read_scalar(*kind, bytes)),
            Shape::Struct(fields) => fields
                .iter()
                .map(|field| field.layout.read(bytes.get(field.offset as usize..)?))
                .collect::<Option<Vec<_>>>()
                .map(YieldValue::Tuple),
        }
    }
}

fn read_scalar(kind: ScalarKind, bytes: &[u8]) -> YieldValue {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    match kind {
        ScalarKind::Bool => YieldValue::Bool(bytes[0] != 0),
        ScalarKind::I32 => YieldValue::I32(i32::from_ne_bytes([word[0], word[1], word[2], word[3]])),
        ScalarKind::I64 => YieldValue::I64(i64::from_ne_bytes(word)),
        ScalarKind::F64 => YieldValue::F64(f64::from_ne_bytes(word)),
        ScalarKind::Ptr if bytes.len() == 4 => {
            YieldValue::Ptr(u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) as usize)
        }
        ScalarKind::Ptr => YieldValue::Ptr(u64::from_ne_bytes(word) as usize),
    }
}

/// A yielded value decoded on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum YieldValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Ptr(usize),
    Tuple(Vec<YieldValue>),
}

impl YieldValue {
    pub fn pair(first: impl Into<YieldValue>, second: impl Into<YieldValue>) -> Self {
        YieldValue::Tuple(vec![first.into(), second.into()])
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            YieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[YieldValue]> {
        match self {
            YieldValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for YieldValue {
    fn from(value: i64) -> Self {
        YieldValue::I64(value)
    }
}

impl From<bool> for YieldValue {
    fn from(value: bool) -> Self {
        YieldValue::Bool(value)
    }
}

impl From<f64> for YieldValue {
    fn from(value: f64) -> Self {
        YieldValue::F64(value)
    }
}

/// Computes and memoizes layouts per resolved type.
pub struct LayoutBuilder {
    ptr_bytes: u32,
    values: FxHashMap<ValueType, Rc<Layout>>,
    enumerate_state: Option<Rc<Layout>>,
    zip_states: FxHashMap<usize, Rc<Layout>>,
}

impl LayoutBuilder {
    pub fn new(ptr_type: Type) -> Self {
        Self::with_pointer_bytes(ptr_type.bytes())
    }

    pub fn with_pointer_bytes(ptr_bytes: u32) -> Self {
        Self {
            ptr_bytes,
            values: FxHashMap::default(),
            enumerate_state: None,
            zip_states: FxHashMap::default(),
        }
    }

    pub fn pointer_bytes(&self) -> u32 {
        self.ptr_bytes
    }

    fn scalar(&self, kind: ScalarKind) -> Layout {
        Layout::scalar(kind, self.ptr_bytes)
    }

    pub fn value_layout(&mut self, ty: &ValueType) -> Rc<Layout> {
        if let Some(layout) = self.values.get(ty) {
            return Rc::clone(layout);
        }
        let layout = match ty {
            ValueType::Scalar(kind) => self.scalar(*kind),
            ValueType::Tuple(fields) => Layout::record(
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| (i.to_string(), (*self.value_layout(field)).clone()))
                    .collect(),
            ),
        };
        let layout = Rc::new(layout);
        self.values.insert(ty.clone(), Rc::clone(&layout));
        layout
    }

    /// Layout of the value `iternext` writes for `kind`.
    pub fn yield_layout(&mut self, kind: &IterKind) -> Rc<Layout> {
        self.value_layout(&kind.yield_type())
    }

    pub fn enumerate_state(&mut self) -> Rc<Layout> {
        if let Some(layout) = &self.enumerate_state {
            return Rc::clone(layout);
        }
        let layout = Rc::new(Layout::record(vec![
            ("count".to_string(), self.scalar(ScalarKind::I64)),
            ("source".to_string(), self.scalar(ScalarKind::Ptr)),
        ]));
        self.enumerate_state = Some(Rc::clone(&layout));
        layout
    }

    pub fn zip_state(&mut self, sources: usize) -> Rc<Layout> {
        if let Some(layout) = self.zip_states.get(&sources) {
            return Rc::clone(layout);
        }
        let ptr = self.scalar(ScalarKind::Ptr);
        let layout = Rc::new(Layout::record(
            (0..sources)
                .map(|i| (format!("source_{i}"), ptr.clone()))
                .collect(),
        ));
        self.zip_states.insert(sources, Rc::clone(&layout));
        layout
    }

    /// Layout of the state a combinator value points at; `None` when opaque.
    pub fn state_layout(&mut self, kind: &IterKind) -> Option<Rc<Layout>> {
        match kind {
            IterKind::Enumerate(_) => Some(self.enumerate_state()),
            IterKind::Zip(zip) => Some(self.zip_state(zip.sources.len())),
            IterKind::Generator(_) | IterKind::External(_) => None,
        }
    }

    /// `{ source: ptr [, start: <int>] }`
    pub fn enumerate_args(&self, args: &[ScalarKind]) -> Layout {
        Layout::record(
            ["source", "start"]
                .iter()
                .zip(args)
                .map(|(name, &arg)| (name.to_string(), self.scalar(arg)))
                .collect(),
        )
    }

    /// `{ source_0: ptr, .. }`
    pub fn zip_args(&self, args: &[ScalarKind]) -> Layout {
        Layout::record(
            args.iter()
                .enumerate()
                .map(|(i, &arg)| (format!("source_{i}"), self.scalar(arg)))
                .collect(),
        )
    }

    /// Layout of the packed argument record a constructor of `kind` reads;
    /// `None` for kinds without constructors.
    pub fn args_layout(&self, kind: &IterKind, args: &[ScalarKind]) -> Option<Layout> {
        match kind {
            IterKind::Enumerate(_) => Some(self.enumerate_args(args)),
            IterKind::Zip(_) => Some(self.zip_args(args)),
            IterKind::Generator(_) | IterKind::External(_) => None,
        }
    }
}

// =============================================================================
// IR-level field accessors
// =============================================================================

/// Address of field `index` within the struct at `base`.
pub(crate) fn field_addr(
    builder: &mut FunctionBuilder,
    layout: &Layout,
    index: usize,
    base: Value,
) -> CodegenResult<Value> {
    let offset = layout.field(index)?.offset;
    if offset == 0 {
        return Ok(base);
    }
    Ok(builder.ins().iadd_imm(base, i64::from(offset)))
}

/// Load scalar field `index` from the struct at `base`.
pub(crate) fn load_field(
    builder: &mut FunctionBuilder,
    layout: &Layout,
    index: usize,
    base: Value,
    ptr_type: Type,
) -> CodegenResult<Value> {
    let field = layout.field(index)?;
    let kind = field.layout.scalar_kind().ok_or_else(|| {
        CodegenError::internal_with_context("load of aggregate field", field.name.clone())
    })?;
    Ok(builder.ins().load(
        kind.ir_type(ptr_type),
        MemFlags::trusted(),
        base,
        field.offset as i32,
    ))
}

/// Store `value` into scalar field `index` of the struct at `base`.
pub(crate) fn store_field(
    builder: &mut FunctionBuilder,
    layout: &Layout,
    index: usize,
    base: Value,
    value: Value,
) -> CodegenResult<()> {
    let field = layout.field(index)?;
    if field.layout.scalar_kind().is_none() {
        return Err(CodegenError::internal_with_context(
            "store to aggregate field",
            field.name.clone(),
        ));
    }
    builder
        .ins()
        .store(MemFlags::trusted(), value, base, field.offset as i32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> LayoutBuilder {
        LayoutBuilder::with_pointer_bytes(8)
    }

    #[test]
    fn enumerate_state_layout_is_stable() {
        let mut layouts = builder();
        let state = layouts
            .state_layout(&IterKind::enumerate(IterKind::array_i64()))
            .unwrap();
        assert_eq!(state.size, 16);
        assert_eq!(state.align, 8);
        let count = state.field(ENUMERATE_COUNT).unwrap();
        let source = state.field(ENUMERATE_SOURCE).unwrap();
        assert_eq!((count.name.as_str(), count.offset), ("count", 0));
        assert_eq!((source.name.as_str(), source.offset), ("source", 8));
    }

    #[test]
    fn zip_state_has_one_pointer_per_source() {
        let mut layouts = builder();
        let kind = IterKind::zip(vec![
            IterKind::array_i64(),
            IterKind::range_i64(),
            IterKind::array_i64(),
        ]);
        let state = layouts.state_layout(&kind).unwrap();
        assert_eq!(state.size, 24);
        let offsets: Vec<u32> = state.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(state.field_named("source_2").unwrap().offset, 16);
    }

    #[test]
    fn empty_zip_state_is_zero_sized() {
        let mut layouts = builder();
        let state = layouts.state_layout(&IterKind::zip(vec![])).unwrap();
        assert_eq!(state.size, 0);
        assert_eq!(state.align, 1);
        assert!(state.fields().is_empty());
    }

    #[test]
    fn opaque_kinds_have_no_state_layout() {
        let mut layouts = builder();
        assert!(
            layouts
                .state_layout(&IterKind::coroutine_generator("g"))
                .is_none()
        );
        assert!(layouts.state_layout(&IterKind::range_i64()).is_none());
    }

    #[test]
    fn tuple_fields_are_aligned() {
        let mut layouts = builder();
        let ty = ValueType::tuple(vec![
            ValueType::Scalar(ScalarKind::Bool),
            ValueType::i64(),
            ValueType::Scalar(ScalarKind::I32),
        ]);
        let layout = layouts.value_layout(&ty);
        let offsets: Vec<u32> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn layouts_are_memoized() {
        let mut layouts = builder();
        let ty = ValueType::tuple(vec![ValueType::i64(), ValueType::f64()]);
        let a = layouts.value_layout(&ty);
        let b = layouts.value_layout(&ty);
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn enumerate_args_layout_names_start() {
        let layouts = builder();
        let kind = IterKind::enumerate(IterKind::array_i64());
        let args = layouts
            .args_layout(&kind, &[ScalarKind::Ptr, ScalarKind::I32])
            .unwrap();
        assert_eq!(args.field_named("source").unwrap().offset, 0);
        assert_eq!(args.field_named("start").unwrap().offset, 8);
        assert_eq!(args.size, 16);
    }

    #[test]
    fn state_layouts_are_memoized() {
        let mut layouts = builder();
        let a = layouts.zip_state(2);
        let b = layouts
            .state_layout(&IterKind::zip(vec![IterKind::range_i64(), IterKind::range_i64()]))
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(Rc::ptr_eq(&layouts.enumerate_state(), &layouts.enumerate_state()));
    }

    #[test]
    fn generators_have_no_constructor_args() {
        let layouts = builder();
        assert!(
            layouts
                .args_layout(&IterKind::coroutine_generator("g"), &[ScalarKind::Ptr])
                .is_none()
        );
    }

    #[test]
    fn read_decodes_nested_tuples() {
        let mut layouts = builder();
        let ty = ValueType::tuple(vec![
            ValueType::i64(),
            ValueType::tuple(vec![ValueType::i64(), ValueType::Scalar(ScalarKind::Bool)]),
        ]);
        let layout = layouts.value_layout(&ty);
        let mut bytes = vec![0u8; layout.size as usize];
        bytes[0..8].copy_from_slice(&3i64.to_ne_bytes());
        bytes[8..16].copy_from_slice(&(-4i64).to_ne_bytes());
        bytes[16] = 1;
        assert_eq!(
            layout.read(&bytes),
            Some(YieldValue::pair(3i64, YieldValue::pair(-4i64, true)))
        );
    }

    #[test]
    fn read_rejects_short_buffers() {
        let mut layouts = builder();
        let ty = ValueType::tuple(vec![ValueType::i64(), ValueType::i64()]);
        let layout = layouts.value_layout(&ty);
        assert_eq!(layout.read(&[0u8; 12]), None);
        assert_eq!(layout.read(&[]), None);
        // Trailing bytes past the layout are ignored.
        let mut bytes = vec![0u8; 20];
        bytes[8..16].copy_from_slice(&7i64.to_ne_bytes());
        assert_eq!(layout.read(&bytes), Some(YieldValue::pair(0i64, 7i64)));
    }

    #[test]
    fn empty_tuple_reads_from_an_empty_buffer() {
        let layout = Layout::record(vec![]);
        assert_eq!(layout.read(&[]), Some(YieldValue::Tuple(vec![])));
    }

    #[test]
    fn field_out_of_range_is_internal_error() {
        let layout = Layout::record(vec![]);
        assert!(layout.field(0).is_err());
    }
}
