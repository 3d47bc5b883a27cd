//! Typed columns: a dense value buffer in the region allocator paired with
//! a presence bitmap of the same logical length.
//!
//! Value buffers are power-of-two sized and cache-line aligned, so every
//! kernel may load and store full lane groups at the tail without leaving
//! the allocation.

pub mod bf16;
pub mod domain;
pub mod ops;
pub mod random;
pub mod reduce;
pub mod simd;

use std::marker::PhantomData;

pub use bf16::Bf16;
pub use domain::{ComputeScalar, ElementDomain};
pub use reduce::Reduced;

use crate::bitmap::PresenceBitmap;
use crate::error::{self, EngineError, ErrorCode, ErrorRecord, Result};
use crate::mem::Region;
use crate::types::{BinOp, DataType};

/// Growable element buffer backed by a single arena block
#[derive(Debug)]
struct ValueBuf<T> {
    region: Option<Region>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: ElementDomain> ValueBuf<T> {
    fn empty() -> Self {
        ValueBuf {
            region: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    fn with_len(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self::empty());
        }
        let mut region = Region::allocate(len * std::mem::size_of::<T>())?;
        // Recycled blocks may carry old data; give fresh columns a defined
        // (if unspecified) payload
        unsafe {
            std::ptr::write_bytes(region.as_mut_ptr(), 0, region.capacity());
        }
        Ok(ValueBuf {
            region: Some(region),
            len,
            _marker: PhantomData,
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.region
            .as_ref()
            .map_or(0, |r| r.capacity() / std::mem::size_of::<T>())
    }

    #[inline]
    fn as_ptr(&self) -> *const T {
        self.region
            .as_ref()
            .map_or(std::ptr::NonNull::<T>::dangling().as_ptr() as *const T, |r| {
                r.as_ptr() as *const T
            })
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut T {
        self.region
            .as_mut()
            .map_or(std::ptr::NonNull::<T>::dangling().as_ptr(), |r| {
                r.as_mut_ptr() as *mut T
            })
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Append one element, growing into a fresh block when capacity runs
    /// out
    fn push(&mut self, value: T) -> Result<()> {
        if self.len == self.capacity() {
            let new_bytes = ((self.len * 2).max(1)) * std::mem::size_of::<T>();
            let mut grown = Region::allocate(new_bytes)?;
            unsafe {
                std::ptr::write_bytes(grown.as_mut_ptr(), 0, grown.capacity());
                std::ptr::copy_nonoverlapping(
                    self.as_ptr() as *const u8,
                    grown.as_mut_ptr(),
                    self.len * std::mem::size_of::<T>(),
                );
            }
            self.region = Some(grown);
        }
        unsafe {
            self.as_mut_ptr().add(self.len).write(value);
        }
        self.len += 1;
        Ok(())
    }
}

/// A column of `T` with per-element presence
#[derive(Debug)]
pub struct Column<T: ElementDomain> {
    values: ValueBuf<T>,
    presence: PresenceBitmap,
}

impl<T: ElementDomain> Column<T> {
    /// Empty column
    pub fn new() -> Self {
        Column {
            values: ValueBuf::empty(),
            presence: PresenceBitmap::new(),
        }
    }

    /// `len` elements, all absent; values are unspecified but defined
    pub fn with_len(len: usize) -> Result<Self> {
        Ok(Column {
            values: ValueBuf::with_len(len)?,
            presence: PresenceBitmap::with_len(len, false),
        })
    }

    /// `len` elements, every value `fill`, all present
    pub fn with_fill(len: usize, fill: T) -> Result<Self> {
        let mut values = ValueBuf::with_len(len)?;
        for slot in values.as_mut_slice() {
            *slot = fill;
        }
        Ok(Column {
            values,
            presence: PresenceBitmap::with_len(len, true),
        })
    }

    /// Column copying `data`, all present
    pub fn from_slice(data: &[T]) -> Result<Self> {
        let mut values = ValueBuf::with_len(data.len())?;
        values.as_mut_slice().copy_from_slice(data);
        Ok(Column {
            values,
            presence: PresenceBitmap::with_len(data.len(), true),
        })
    }

    /// Column from optional values; `None` slots are absent
    pub fn from_optional(data: &[Option<T>]) -> Result<Self> {
        let mut col = Column::with_len(data.len())?;
        for (i, slot) in data.iter().enumerate() {
            if let Some(v) = slot {
                col.values.as_mut_slice()[i] = *v;
                col.presence.set(i, true);
            }
        }
        Ok(col)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.len == 0
    }

    /// Elements the backing block can hold (a power-of-two multiple of the
    /// lane group)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    #[inline]
    pub fn values(&self) -> &[T] {
        self.values.as_slice()
    }

    #[inline]
    pub fn presence(&self) -> &PresenceBitmap {
        &self.presence
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const T {
        self.values.as_ptr()
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.values.as_mut_ptr()
    }

    pub(crate) fn presence_mut(&mut self) -> &mut PresenceBitmap {
        &mut self.presence
    }

    /// Checked read: `None` when absent; out-of-range additionally reports
    /// to the error channel
    #[track_caller]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            error::report(
                ErrorRecord::new(
                    ErrorCode::OutOfRange,
                    "column",
                    "get",
                    "index exceeds column length",
                )
                .with_context(index as u64)
                .with_context(self.len() as u64),
            );
            return None;
        }
        if self.presence.test_unchecked(index) {
            Some(self.values.as_slice()[index])
        } else {
            None
        }
    }

    /// Unchecked value read; `index` must be in range and the slot may
    /// hold an unspecified value when absent
    #[inline]
    pub fn value_unchecked(&self, index: usize) -> T {
        debug_assert!(index < self.len());
        self.values.as_slice()[index]
    }

    /// Checked presence read; out-of-range reports and reads as absent
    #[track_caller]
    pub fn present(&self, index: usize) -> bool {
        if index >= self.len() {
            error::report(
                ErrorRecord::new(
                    ErrorCode::OutOfRange,
                    "column",
                    "present",
                    "index exceeds column length",
                )
                .with_context(index as u64)
                .with_context(self.len() as u64),
            );
            return false;
        }
        self.presence.test_unchecked(index)
    }

    #[inline]
    pub fn present_unchecked(&self, index: usize) -> bool {
        self.presence.test_unchecked(index)
    }

    /// Write a value and mark the slot present
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        if index >= self.len() {
            return Err(EngineError::OutOfRange {
                index,
                len: self.len(),
            });
        }
        self.values.as_mut_slice()[index] = value;
        self.presence.set(index, true);
        Ok(())
    }

    /// Append one element; `None` appends an absent slot
    pub fn push(&mut self, value: Option<T>) -> Result<()> {
        self.values.push(value.unwrap_or_default())?;
        self.presence.push(value.is_some());
        Ok(())
    }

    /// Shorten to `len` elements; no-op when already shorter
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.values.len = len;
            self.presence.resize(len, false);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<T>> + '_ {
        (0..self.len()).map(move |i| {
            if self.presence.test_unchecked(i) {
                Some(self.values.as_slice()[i])
            } else {
                None
            }
        })
    }
}

impl<T: ElementDomain> Clone for Column<T> {
    fn clone(&self) -> Self {
        let mut values =
            ValueBuf::with_len(self.len()).expect("region arena exhausted while cloning column");
        values.as_mut_slice().copy_from_slice(self.values.as_slice());
        Column {
            values,
            presence: self.presence.clone(),
        }
    }
}

impl<T: ElementDomain> Default for Column<T> {
    fn default() -> Self {
        Column::new()
    }
}

/// Type-erased column for runtime boundaries (environment, FFI)
#[derive(Debug, Clone)]
pub enum AnyColumn {
    I32(Column<i32>),
    F32(Column<f32>),
    Bf16(Column<Bf16>),
}

impl AnyColumn {
    pub fn len(&self) -> usize {
        match self {
            AnyColumn::I32(c) => c.len(),
            AnyColumn::F32(c) => c.len(),
            AnyColumn::Bf16(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            AnyColumn::I32(_) => DataType::I32,
            AnyColumn::F32(_) => DataType::F32,
            AnyColumn::Bf16(_) => DataType::Bf16,
        }
    }

    pub fn presence(&self) -> &PresenceBitmap {
        match self {
            AnyColumn::I32(c) => c.presence(),
            AnyColumn::F32(c) => c.presence(),
            AnyColumn::Bf16(c) => c.presence(),
        }
    }

    pub fn as_i32(&self) -> Option<&Column<i32>> {
        match self {
            AnyColumn::I32(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&Column<f32>> {
        match self {
            AnyColumn::F32(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bf16(&self) -> Option<&Column<Bf16>> {
        match self {
            AnyColumn::Bf16(c) => Some(c),
            _ => None,
        }
    }

    /// Lane value widened to f64, for tests and diagnostics
    pub fn get_as_f64(&self, index: usize) -> Option<f64> {
        match self {
            AnyColumn::I32(c) => c.get(index).map(|v| v as f64),
            AnyColumn::F32(c) => c.get(index).map(|v| v as f64),
            AnyColumn::Bf16(c) => c.get(index).map(|v| v.to_f32() as f64),
        }
    }

    /// Convert to another physical element type, preserving presence
    pub fn cast_to(&self, target: DataType) -> Result<AnyColumn> {
        match (self, target) {
            (c, t) if c.data_type() == t => Ok(c.clone()),
            (AnyColumn::I32(c), DataType::F32) => {
                Ok(AnyColumn::F32(convert(c, |v| v as f32)?))
            }
            (AnyColumn::I32(c), DataType::Bf16) => {
                Ok(AnyColumn::Bf16(convert(c, |v| Bf16::from_f32(v as f32))?))
            }
            (AnyColumn::F32(c), DataType::I32) => {
                Ok(AnyColumn::I32(convert(c, |v| v as i32)?))
            }
            (AnyColumn::F32(c), DataType::Bf16) => {
                Ok(AnyColumn::Bf16(convert(c, Bf16::from_f32)?))
            }
            (AnyColumn::Bf16(c), DataType::F32) => {
                Ok(AnyColumn::F32(convert(c, Bf16::to_f32)?))
            }
            (AnyColumn::Bf16(c), DataType::I32) => {
                Ok(AnyColumn::I32(convert(c, |v| v.to_f32() as i32)?))
            }
            (c, t) => Err(EngineError::TypeMismatch {
                expected: t.materialize(),
                found: c.data_type(),
            }),
        }
    }

    /// Elementwise arithmetic between same-typed columns
    pub fn elementwise(&self, other: &AnyColumn, op: BinOp) -> Result<AnyColumn> {
        match (self, other) {
            (AnyColumn::I32(a), AnyColumn::I32(b)) => {
                if op.is_bitwise() {
                    Ok(AnyColumn::I32(ops::binary_bitwise(a, b, op)?))
                } else {
                    Ok(AnyColumn::I32(ops::binary_elementwise(a, b, op)?))
                }
            }
            (AnyColumn::F32(a), AnyColumn::F32(b)) => {
                Ok(AnyColumn::F32(ops::binary_elementwise(a, b, op)?))
            }
            (AnyColumn::Bf16(a), AnyColumn::Bf16(b)) => {
                Ok(AnyColumn::Bf16(ops::binary_elementwise(a, b, op)?))
            }
            (a, b) => Err(EngineError::TypeMismatch {
                expected: a.data_type(),
                found: b.data_type(),
            }),
        }
    }
}

fn convert<S: ElementDomain, D: ElementDomain>(
    src: &Column<S>,
    f: impl Fn(S) -> D,
) -> Result<Column<D>> {
    let mut out = Column::with_len(src.len())?;
    for (i, v) in src.values().iter().enumerate() {
        out.values.as_mut_slice()[i] = f(*v);
    }
    *out.presence_mut() = src.presence().clone();
    Ok(out)
}
