//! Dense columns backing a property store, one variant per [`ValueKind`].
//!
//! Columns are indexed by entity slot and only materialize up to the highest slot written so far;
//! reads past the end return `None` and the store substitutes the property default. Every column
//! counts how many times its backing allocation had to grow, which lets callers verify that an
//! up-front `expand_capacity` really covers a later burst of writes.

use crate::property_store::value::{PropertyValue, ValueKind, ValueType};

const WORD_BITS: usize = u64::BITS as usize;

/// A bit-packed boolean column.
#[derive(Debug, Clone, Default)]
pub(crate) struct BitColumn {
    words: Vec<u64>,
    len: usize,
    fill: bool,
    allocations: usize,
}

impl BitColumn {
    pub(crate) fn new(fill: bool) -> Self {
        BitColumn {
            fill,
            ..BitColumn::default()
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some((self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 1 == 1)
    }

    pub(crate) fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            self.grow(index + 1);
        }
        let mask = 1u64 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        } else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }

    /// Restores the slot to the fill value without growing the column.
    pub(crate) fn reset(&mut self, index: usize) {
        if index < self.len {
            self.set(index, self.fill);
        }
    }

    /// Ensures room for `capacity` slots without reallocating.
    pub(crate) fn expand_capacity(&mut self, capacity: usize) {
        let words = capacity.div_ceil(WORD_BITS);
        if words > self.words.capacity() {
            self.words.reserve_exact(words - self.words.len());
            self.allocations += 1;
        }
    }

    // Bits past `len` are always zero, so only a `true` fill needs writing.
    fn grow(&mut self, new_len: usize) {
        let before = self.words.capacity();
        let words = new_len.div_ceil(WORD_BITS);
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
        let old_len = self.len;
        self.len = new_len;
        if self.fill {
            for index in old_len..new_len {
                self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
            }
        }
        if self.words.capacity() != before {
            self.allocations += 1;
        }
    }
}

/// A plain dense column of `T`.
#[derive(Debug, Clone)]
pub(crate) struct DenseColumn<T: Clone> {
    data: Vec<T>,
    fill: T,
    allocations: usize,
}

impl<T: Clone> DenseColumn<T> {
    pub(crate) fn new(fill: T) -> Self {
        DenseColumn {
            data: Vec::new(),
            fill,
            allocations: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    pub(crate) fn set(&mut self, index: usize, value: T) {
        if index < self.data.len() {
            self.data[index] = value;
            return;
        }
        let before = self.data.capacity();
        self.data.resize(index, self.fill.clone());
        self.data.push(value);
        if self.data.capacity() != before {
            self.allocations += 1;
        }
    }

    pub(crate) fn reset(&mut self, index: usize) {
        if index < self.data.len() {
            self.data[index] = self.fill.clone();
        }
    }

    pub(crate) fn expand_capacity(&mut self, capacity: usize) {
        if capacity > self.data.capacity() {
            self.data.reserve_exact(capacity - self.data.len());
            self.allocations += 1;
        }
    }
}

/// The storage width of an [`IntColumn`]. Widths only ever grow.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum IntWidth {
    I8,
    I16,
    I32,
    I64,
}

impl IntWidth {
    /// The narrowest width that holds `value`.
    pub(crate) fn of(value: i64) -> IntWidth {
        if i8::try_from(value).is_ok() {
            IntWidth::I8
        } else if i16::try_from(value).is_ok() {
            IntWidth::I16
        } else if i32::try_from(value).is_ok() {
            IntWidth::I32
        } else {
            IntWidth::I64
        }
    }
}

#[derive(Debug, Clone)]
enum IntData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

macro_rules! with_vec {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            IntData::I8($v) => $body,
            IntData::I16($v) => $body,
            IntData::I32($v) => $body,
            IntData::I64($v) => $body,
        }
    };
}

// Narrowing `as` casts below are only reached once `IntColumn::set` has widened the column to fit
// the value.
#[allow(clippy::cast_possible_truncation)]
impl IntData {
    fn with_capacity(width: IntWidth, capacity: usize) -> IntData {
        match width {
            IntWidth::I8 => IntData::I8(Vec::with_capacity(capacity)),
            IntWidth::I16 => IntData::I16(Vec::with_capacity(capacity)),
            IntWidth::I32 => IntData::I32(Vec::with_capacity(capacity)),
            IntWidth::I64 => IntData::I64(Vec::with_capacity(capacity)),
        }
    }

    fn width(&self) -> IntWidth {
        match self {
            IntData::I8(_) => IntWidth::I8,
            IntData::I16(_) => IntWidth::I16,
            IntData::I32(_) => IntWidth::I32,
            IntData::I64(_) => IntWidth::I64,
        }
    }

    fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    fn capacity(&self) -> usize {
        with_vec!(self, v => v.capacity())
    }

    fn get(&self, index: usize) -> Option<i64> {
        with_vec!(self, v => v.get(index).map(|x| i64::from(*x)))
    }

    fn set(&mut self, index: usize, value: i64) {
        with_vec!(self, v => v[index] = value as _)
    }

    fn push(&mut self, value: i64) {
        with_vec!(self, v => v.push(value as _))
    }

    fn resize(&mut self, len: usize, fill: i64) {
        with_vec!(self, v => v.resize(len, fill as _))
    }
}

/// An integer column that starts at the narrowest width holding its fill value and promotes to a
/// wider width the first time a value does not fit.
///
/// Reserving capacity moves the column straight to `i64` in the same allocation, so writes into a
/// reserved range never promote.
#[derive(Debug, Clone)]
pub(crate) struct IntColumn {
    data: IntData,
    fill: i64,
    allocations: usize,
}

impl IntColumn {
    pub(crate) fn new(fill: i64) -> Self {
        IntColumn {
            data: IntData::with_capacity(IntWidth::of(fill), 0),
            fill,
            allocations: 0,
        }
    }

    pub(crate) fn width(&self) -> IntWidth {
        self.data.width()
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations
    }

    pub(crate) fn get(&self, index: usize) -> Option<i64> {
        self.data.get(index)
    }

    pub(crate) fn set(&mut self, index: usize, value: i64) {
        let needed = IntWidth::of(value);
        if needed > self.width() {
            self.promote(needed, self.data.capacity());
        }
        let len = self.data.len();
        if index < len {
            self.data.set(index, value);
            return;
        }
        let before = self.data.capacity();
        self.data.resize(index, self.fill);
        self.data.push(value);
        if self.data.capacity() != before {
            self.allocations += 1;
        }
    }

    pub(crate) fn reset(&mut self, index: usize) {
        if index < self.data.len() {
            self.data.set(index, self.fill);
        }
    }

    pub(crate) fn expand_capacity(&mut self, capacity: usize) {
        if capacity > self.data.capacity() {
            self.promote(IntWidth::I64, capacity);
        }
    }

    /// Copies the column into a new allocation of `width` holding `capacity` slots.
    fn promote(&mut self, width: IntWidth, capacity: usize) {
        let len = self.data.len();
        let mut wider = IntData::with_capacity(width, capacity.max(len));
        for index in 0..len {
            if let Some(value) = self.data.get(index) {
                wider.push(value);
            }
        }
        self.data = wider;
        self.allocations += 1;
    }
}

/// The concrete column for a property, chosen once from its declared [`ValueType`].
#[derive(Debug, Clone)]
pub(crate) enum Column {
    Boolean(BitColumn),
    Int(IntColumn),
    Float(DenseColumn<f32>),
    Double(DenseColumn<f64>),
    Enum(DenseColumn<u16>),
    Object(DenseColumn<serde_json::Value>),
}

impl Column {
    /// Builds an empty column. Unwritten slots below the materialized length hold `fill`, or a
    /// zero value of the right kind if `fill` is absent.
    pub(crate) fn new(value_type: &ValueType, fill: Option<&PropertyValue>) -> Column {
        match (value_type, fill) {
            (ValueType::Boolean, Some(PropertyValue::Boolean(b))) => {
                Column::Boolean(BitColumn::new(*b))
            }
            (ValueType::Boolean, _) => Column::Boolean(BitColumn::new(false)),
            (ValueType::Int, Some(PropertyValue::Int(i))) => Column::Int(IntColumn::new(*i)),
            (ValueType::Int, _) => Column::Int(IntColumn::new(0)),
            (ValueType::Float, Some(PropertyValue::Float(x))) => {
                Column::Float(DenseColumn::new(*x))
            }
            (ValueType::Float, _) => Column::Float(DenseColumn::new(0.0)),
            (ValueType::Double, Some(PropertyValue::Double(x))) => {
                Column::Double(DenseColumn::new(*x))
            }
            (ValueType::Double, _) => Column::Double(DenseColumn::new(0.0)),
            (ValueType::Enum(_), Some(PropertyValue::Enum(ordinal))) => {
                Column::Enum(DenseColumn::new(*ordinal))
            }
            (ValueType::Enum(_), _) => Column::Enum(DenseColumn::new(0)),
            (ValueType::Object, Some(PropertyValue::Object(value))) => {
                Column::Object(DenseColumn::new(value.clone()))
            }
            (ValueType::Object, _) => Column::Object(DenseColumn::new(serde_json::Value::Null)),
        }
    }

    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Column::Boolean(_) => ValueKind::Boolean,
            Column::Int(_) => ValueKind::Int,
            Column::Float(_) => ValueKind::Float,
            Column::Double(_) => ValueKind::Double,
            Column::Enum(_) => ValueKind::Enum,
            Column::Object(_) => ValueKind::Object,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Column::Boolean(c) => c.len(),
            Column::Int(c) => c.len(),
            Column::Float(c) => c.len(),
            Column::Double(c) => c.len(),
            Column::Enum(c) => c.len(),
            Column::Object(c) => c.len(),
        }
    }

    pub(crate) fn allocations(&self) -> usize {
        match self {
            Column::Boolean(c) => c.allocations(),
            Column::Int(c) => c.allocations(),
            Column::Float(c) => c.allocations(),
            Column::Double(c) => c.allocations(),
            Column::Enum(c) => c.allocations(),
            Column::Object(c) => c.allocations(),
        }
    }

    /// Returns `None` past the materialized length.
    pub(crate) fn get(&self, index: usize) -> Option<PropertyValue> {
        match self {
            Column::Boolean(c) => c.get(index).map(PropertyValue::Boolean),
            Column::Int(c) => c.get(index).map(PropertyValue::Int),
            Column::Float(c) => c.get(index).copied().map(PropertyValue::Float),
            Column::Double(c) => c.get(index).copied().map(PropertyValue::Double),
            Column::Enum(c) => c.get(index).copied().map(PropertyValue::Enum),
            Column::Object(c) => c.get(index).cloned().map(PropertyValue::Object),
        }
    }

    /// Writes `value` into the slot. The caller has already checked the value kind.
    pub(crate) fn set(&mut self, index: usize, value: PropertyValue) {
        match (self, value) {
            (Column::Boolean(c), PropertyValue::Boolean(b)) => c.set(index, b),
            (Column::Int(c), PropertyValue::Int(i)) => c.set(index, i),
            (Column::Float(c), PropertyValue::Float(x)) => c.set(index, x),
            (Column::Double(c), PropertyValue::Double(x)) => c.set(index, x),
            (Column::Enum(c), PropertyValue::Enum(ordinal)) => c.set(index, ordinal),
            (Column::Object(c), PropertyValue::Object(v)) => c.set(index, v),
            (column, value) => panic!(
                "{} value written to a {} column",
                value.kind(),
                column.kind()
            ),
        }
    }

    pub(crate) fn reset(&mut self, index: usize) {
        match self {
            Column::Boolean(c) => c.reset(index),
            Column::Int(c) => c.reset(index),
            Column::Float(c) => c.reset(index),
            Column::Double(c) => c.reset(index),
            Column::Enum(c) => c.reset(index),
            Column::Object(c) => c.reset(index),
        }
    }

    pub(crate) fn expand_capacity(&mut self, capacity: usize) {
        match self {
            Column::Boolean(c) => c.expand_capacity(capacity),
            Column::Int(c) => c.expand_capacity(capacity),
            Column::Float(c) => c.expand_capacity(capacity),
            Column::Double(c) => c.expand_capacity(capacity),
            Column::Enum(c) => c.expand_capacity(capacity),
            Column::Object(c) => c.expand_capacity(capacity),
        }
    }
}
