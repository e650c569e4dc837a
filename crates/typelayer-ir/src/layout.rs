//! Per-module data layout.
//!
//! The layout answers size, alignment, and field-offset questions, and can
//! run the reverse direction: reconstructing an access-path index chain from
//! a raw byte offset, which the analyses use to recover field accesses that
//! were flattened into byte arithmetic.

use serde::{Deserialize, Serialize};

use crate::types::Type;

/// Data layout context for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataLayout {
    /// Pointer width in bits.
    pub pointer_bits: u32,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self { pointer_bits: 64 }
    }
}

/// Computed layout of a structure under a [`DataLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Byte offset of each field.
    pub offsets: Vec<u64>,
    /// Total size in bytes, padded to the structure's alignment.
    pub size: u64,
    /// Alignment requirement in bytes.
    pub align: u64,
}

impl DataLayout {
    pub fn new(pointer_bits: u32) -> Self {
        Self { pointer_bits }
    }

    /// Pointer size in bytes.
    pub fn pointer_size(&self) -> u64 {
        (self.pointer_bits as u64).div_ceil(8)
    }

    /// Bit width of the pointer-sized integer for this module.
    pub fn int_ptr_bits(&self) -> u32 {
        self.pointer_bits
    }

    /// Size of a type in bytes. Void, functions, and opaque named references
    /// are zero-sized here; they never appear inside a laid-out aggregate.
    pub fn size_of(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void | Type::Function(_) | Type::Named(_) => 0,
            Type::Integer { bits } | Type::Float { bits } => (*bits as u64).div_ceil(8),
            Type::Pointer(_) => self.pointer_size(),
            Type::Array { element, len } | Type::Vector { element, len } => {
                self.size_of(element) * len
            }
            Type::Struct(_) => self.struct_layout(ty).map(|l| l.size).unwrap_or(0),
        }
    }

    /// Natural alignment of a type in bytes, capped at the pointer size.
    pub fn align_of(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void | Type::Function(_) | Type::Named(_) => 1,
            Type::Integer { bits } | Type::Float { bits } => {
                ((*bits as u64).div_ceil(8)).min(self.pointer_size()).max(1)
            }
            Type::Pointer(_) => self.pointer_size(),
            Type::Array { element, .. } | Type::Vector { element, .. } => self.align_of(element),
            Type::Struct(st) => {
                if st.packed {
                    1
                } else {
                    st.fields.iter().map(|f| self.align_of(f)).max().unwrap_or(1)
                }
            }
        }
    }

    /// Field offsets, size, and alignment for a structure type.
    pub fn struct_layout(&self, ty: &Type) -> Option<StructLayout> {
        let st = match ty {
            Type::Struct(st) => st,
            _ => return None,
        };

        let mut offsets = Vec::with_capacity(st.fields.len());
        let mut size = 0u64;
        let mut align = 1u64;

        for field in &st.fields {
            let field_align = if st.packed { 1 } else { self.align_of(field) };
            let offset = round_up(size, field_align);
            offsets.push(offset);
            size = offset + self.size_of(field);
            align = align.max(field_align);
        }

        Some(StructLayout {
            offsets,
            size: round_up(size, align),
            align,
        })
    }

    /// The field index covering `offset` within a structure, along with the
    /// field's own starting offset.
    pub fn field_at_offset(&self, ty: &Type, offset: u64) -> Option<(usize, u64)> {
        let layout = self.struct_layout(ty)?;
        // Last field whose start is not past the offset.
        let mut found = None;
        for (idx, &start) in layout.offsets.iter().enumerate() {
            if start <= offset {
                found = Some((idx, start));
            } else {
                break;
            }
        }
        found
    }

    /// Reconstruct an access-path index chain reaching `offset` bytes into
    /// `ty`. The first index counts whole objects of `ty`, matching the
    /// leading index of a field-access instruction; subsequent indices
    /// descend composite levels. Returns `None` when the offset does not land
    /// exactly on a leaf boundary.
    pub fn gep_indices_for_offset(&self, ty: &Type, offset: u64) -> Option<Vec<i64>> {
        let object_size = self.size_of(ty);
        if object_size == 0 {
            return None;
        }

        let mut indices = vec![(offset / object_size) as i64];
        let mut rem = offset % object_size;
        let mut cur = ty;

        while rem > 0 || cur.is_composite() {
            match cur {
                Type::Struct(_) => {
                    let (idx, start) = self.field_at_offset(cur, rem)?;
                    indices.push(idx as i64);
                    rem -= start;
                    cur = cur.field_type(idx as i64)?;
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => {
                    let elem_size = self.size_of(element);
                    if elem_size == 0 {
                        return None;
                    }
                    indices.push((rem / elem_size) as i64);
                    rem %= elem_size;
                    cur = element;
                }
                _ => break,
            }
        }

        if rem == 0 {
            Some(indices)
        } else {
            None
        }
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}
