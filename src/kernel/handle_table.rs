//! Decoder for the kernel's extended system handle table.
//!
//! `NtQuerySystemInformation(SystemExtendedHandleInformation)` fills a buffer
//! laid out as:
//!
//! ```text
//! ULONG_PTR NumberOfHandles;
//! ULONG_PTR Reserved;
//! SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX Handles[NumberOfHandles];
//!
//! SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX {
//!     PVOID     Object;
//!     ULONG_PTR UniqueProcessId;
//!     ULONG_PTR HandleValue;
//!     ULONG     GrantedAccess;
//!     USHORT    CreatorBackTraceIndex;
//!     USHORT    ObjectTypeIndex;
//!     ULONG     HandleAttributes;
//!     ULONG     Reserved;
//! }
//! ```
//!
//! This is the only module that interprets those bytes. Every read goes
//! through `slice::get`, so a short or lying buffer yields `None` or an
//! error rather than an out-of-bounds access.

use crate::config::types::{HandleValue, LiberationError, Result};
use serde::Serialize;

/// `SystemExtendedHandleInformation`
pub const SYSTEM_EXTENDED_HANDLE_INFORMATION: u32 = 64;

/// Field offsets of the handle table for one pointer width
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLayout {
    pub pointer_width: usize,
    pub header_len: usize,
    pub entry_len: usize,
    pub object: usize,
    pub process_id: usize,
    pub handle_value: usize,
    pub granted_access: usize,
    pub object_type_index: usize,
    pub attributes: usize,
}

impl EntryLayout {
    pub const fn for_pointer_width(width: usize) -> Self {
        Self {
            pointer_width: width,
            header_len: 2 * width,
            entry_len: 3 * width + 16,
            object: 0,
            process_id: width,
            handle_value: 2 * width,
            granted_access: 3 * width,
            object_type_index: 3 * width + 6,
            attributes: 3 * width + 8,
        }
    }

    /// Layout of the running process
    pub const fn native() -> Self {
        Self::for_pointer_width(std::mem::size_of::<usize>())
    }

    /// Bytes needed to hold `count` records
    pub fn required_len(&self, count: usize) -> usize {
        self.header_len + count * self.entry_len
    }

    fn capacity(&self, buffer_len: usize) -> usize {
        buffer_len.saturating_sub(self.header_len) / self.entry_len
    }
}

/// One decoded handle table record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HandleEntry {
    pub process_id: u32,
    pub object_type_index: u16,
    pub attributes: u32,
    pub handle_value: HandleValue,
    /// Kernel address of the object; only useful as an identity
    pub object: usize,
    pub granted_access: u32,
}

/// Output buffer for the kernel query.
///
/// Backed by `u64` words so the kernel always sees an 8-byte aligned
/// address, regardless of what the allocator would hand out for `Vec<u8>`.
pub struct QueryBuffer {
    words: Vec<u64>,
    len: usize,
}

impl QueryBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes and u8 has no
        // alignment or validity requirements.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the exclusive borrow of `self` prevents aliasing.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// Immutable view over one captured handle table
pub struct HandleTableSnapshot {
    buffer: QueryBuffer,
    layout: EntryLayout,
    count: usize,
}

impl HandleTableSnapshot {
    /// Validate the header against the buffer and take ownership of it
    pub fn from_buffer(buffer: QueryBuffer, layout: EntryLayout) -> Result<Self> {
        let bytes = buffer.as_bytes();
        let declared = read_word(bytes, 0, layout.pointer_width).ok_or(
            LiberationError::MalformedSnapshot {
                declared: 0,
                capacity: 0,
            },
        )?;
        let capacity = layout.capacity(bytes.len());
        if declared > capacity {
            return Err(LiberationError::MalformedSnapshot { declared, capacity });
        }

        Ok(Self {
            buffer,
            layout,
            count: declared,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn layout(&self) -> EntryLayout {
        self.layout
    }

    /// Decode record `index`, or `None` past the end
    pub fn get(&self, index: usize) -> Option<HandleEntry> {
        if index >= self.count {
            return None;
        }
        let layout = &self.layout;
        let base = layout.header_len + index * layout.entry_len;
        let record = self.buffer.as_bytes().get(base..base + layout.entry_len)?;
        let width = layout.pointer_width;

        Some(HandleEntry {
            object: read_word(record, layout.object, width)?,
            process_id: read_word(record, layout.process_id, width)? as u32,
            handle_value: HandleValue(read_word(record, layout.handle_value, width)?),
            granted_access: read_u32(record, layout.granted_access)?,
            object_type_index: read_u16(record, layout.object_type_index)?,
            attributes: read_u32(record, layout.attributes)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = HandleEntry> + '_ {
        (0..self.count).filter_map(move |i| self.get(i))
    }

    /// Records owned by `process_id`
    pub fn owned_by(&self, process_id: u32) -> impl Iterator<Item = HandleEntry> + '_ {
        self.iter().filter(move |e| e.process_id == process_id)
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_ne_bytes(raw.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(raw.try_into().ok()?))
}

fn read_word(bytes: &[u8], offset: usize, width: usize) -> Option<usize> {
    match width {
        4 => read_u32(bytes, offset).map(|v| v as usize),
        8 => {
            let raw = bytes.get(offset..offset + 8)?;
            usize::try_from(u64::from_ne_bytes(raw.try_into().ok()?)).ok()
        }
        _ => None,
    }
}

/// Serialize records into the kernel layout. Used to build snapshots for
/// fakes and benchmarks.
pub fn encode_table(layout: &EntryLayout, entries: &[HandleEntry], buffer: &mut [u8]) -> bool {
    if buffer.len() < layout.required_len(entries.len()) {
        return false;
    }
    let width = layout.pointer_width;
    write_word(buffer, 0, width, entries.len());
    write_word(buffer, width, width, 0);

    for (i, entry) in entries.iter().enumerate() {
        let base = layout.header_len + i * layout.entry_len;
        let record = &mut buffer[base..base + layout.entry_len];
        record.fill(0);
        write_word(record, layout.object, width, entry.object);
        write_word(record, layout.process_id, width, entry.process_id as usize);
        write_word(record, layout.handle_value, width, entry.handle_value.0);
        record[layout.granted_access..layout.granted_access + 4]
            .copy_from_slice(&entry.granted_access.to_ne_bytes());
        record[layout.object_type_index..layout.object_type_index + 2]
            .copy_from_slice(&entry.object_type_index.to_ne_bytes());
        record[layout.attributes..layout.attributes + 4]
            .copy_from_slice(&entry.attributes.to_ne_bytes());
    }
    true
}

fn write_word(bytes: &mut [u8], offset: usize, width: usize, value: usize) {
    if width == 4 {
        bytes[offset..offset + 4].copy_from_slice(&(value as u32).to_ne_bytes());
    } else {
        bytes[offset..offset + 8].copy_from_slice(&(value as u64).to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, handle: usize) -> HandleEntry {
        HandleEntry {
            process_id: pid,
            object_type_index: 37,
            attributes: 0,
            handle_value: HandleValue(handle),
            object: 0xFFFF_8000 + handle,
            granted_access: 0x0012_019F,
        }
    }

    fn snapshot_of(layout: EntryLayout, entries: &[HandleEntry]) -> HandleTableSnapshot {
        let mut buffer = QueryBuffer::zeroed(layout.required_len(entries.len()));
        assert!(encode_table(&layout, entries, buffer.as_bytes_mut()));
        HandleTableSnapshot::from_buffer(buffer, layout).unwrap()
    }

    #[test]
    fn test_layout_sizes() {
        let x64 = EntryLayout::for_pointer_width(8);
        assert_eq!(x64.header_len, 16);
        assert_eq!(x64.entry_len, 40);
        assert_eq!(x64.granted_access, 24);
        assert_eq!(x64.object_type_index, 30);

        let x86 = EntryLayout::for_pointer_width(4);
        assert_eq!(x86.header_len, 8);
        assert_eq!(x86.entry_len, 28);
        assert_eq!(x86.attributes, 20);
    }

    #[test]
    fn test_decode_both_widths() {
        let entries = [entry(4, 0x10), entry(7700, 0x44), entry(70_000, 0x1F0)];
        for width in [4usize, 8] {
            let layout = EntryLayout::for_pointer_width(width);
            let snapshot = snapshot_of(layout, &entries);
            assert_eq!(snapshot.len(), 3);
            let decoded: Vec<_> = snapshot.iter().collect();
            assert_eq!(decoded, entries.to_vec());
        }
    }

    #[test]
    fn test_owned_by_filters_pid() {
        let layout = EntryLayout::native();
        let snapshot = snapshot_of(layout, &[entry(1, 4), entry(2, 8), entry(1, 12)]);
        let mine: Vec<_> = snapshot.owned_by(1).map(|e| e.handle_value.0).collect();
        assert_eq!(mine, vec![4, 12]);
    }

    #[test]
    fn test_get_out_of_range() {
        let snapshot = snapshot_of(EntryLayout::native(), &[entry(1, 4)]);
        assert!(snapshot.get(0).is_some());
        assert!(snapshot.get(1).is_none());
    }

    #[test]
    fn test_declared_count_exceeding_buffer_is_rejected() {
        let layout = EntryLayout::native();
        let mut buffer = QueryBuffer::zeroed(layout.required_len(2));
        assert!(encode_table(&layout, &[entry(1, 4), entry(1, 8)], buffer.as_bytes_mut()));
        // Claim far more records than the buffer holds.
        write_word(buffer.as_bytes_mut(), 0, layout.pointer_width, 1000);

        match HandleTableSnapshot::from_buffer(buffer, layout) {
            Err(LiberationError::MalformedSnapshot { declared, capacity }) => {
                assert_eq!(declared, 1000);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected MalformedSnapshot, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let buffer = QueryBuffer::zeroed(2);
        assert!(HandleTableSnapshot::from_buffer(buffer, EntryLayout::native()).is_err());
    }

    #[test]
    fn test_encode_refuses_short_buffer() {
        let layout = EntryLayout::native();
        let mut buffer = QueryBuffer::zeroed(layout.required_len(1));
        assert!(!encode_table(&layout, &[entry(1, 4), entry(1, 8)], buffer.as_bytes_mut()));
    }

    #[test]
    fn test_query_buffer_is_aligned() {
        let mut buffer = QueryBuffer::zeroed(13);
        assert_eq!(buffer.len(), 13);
        assert_eq!(buffer.as_bytes_mut().as_ptr() as usize % 8, 0);
        assert!(buffer.as_bytes().iter().all(|b| *b == 0));
    }
}
