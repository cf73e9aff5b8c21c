//! Fixed-capacity command byte arena.

use std::sync::atomic::{fence, Ordering};

use bytemuck::Pod;
use tracing::error;

use crate::ops::CommandOp;

/// Producer/consumer state of one [`CommandBuffer`].
///
/// `Ready` buffers sit in the pool or await processing, `Recording` buffers
/// accept writes, `Processing` buffers are being drained by the dispatcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferState {
    #[default]
    Ready,
    Recording,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// A write was attempted outside of a `begin_recording`/`end_recording`
    /// pair, or a state transition was illegal.
    #[error("command buffer is in the {0:?} state")]
    BadState(BufferState),
    /// The write would not fit. Capacity is fixed, so this is a caller bug
    /// or an undersized pool, never a retryable condition.
    #[error("command buffer overflow: {requested} bytes requested, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },
}

/// Append-only byte arena holding a sequence of tagged commands.
///
/// Every write is one tag byte plus the raw bytes of a fixed-layout record,
/// optionally followed by inline bulk data. Reads consume tags and payloads
/// in exactly the order and widths they were written; nothing in the stream
/// is self-describing beyond the sizes implied by each tag.
pub struct CommandBuffer {
    bytes: Box<[u8]>,
    cursor: usize,
    /// High-water mark of the last recording pass.
    size: usize,
    state: BufferState,
}

impl CommandBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            size: 0,
            state: BufferState::Ready,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of recorded bytes (the high-water mark, not the capacity).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn begin_recording(&mut self) -> Result<(), CommandError> {
        if self.state != BufferState::Ready {
            error!(state = ?self.state, "begin_recording on a buffer that is not ready");
            return Err(CommandError::BadState(self.state));
        }
        self.state = BufferState::Recording;
        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<(), CommandError> {
        if self.state != BufferState::Recording {
            error!(state = ?self.state, "end_recording on a buffer that is not recording");
            return Err(CommandError::BadState(self.state));
        }
        self.state = BufferState::Ready;
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<(), CommandError> {
        if self.state != BufferState::Ready {
            error!(state = ?self.state, "start_processing on a buffer that is not ready");
            return Err(CommandError::BadState(self.state));
        }
        self.state = BufferState::Processing;
        Ok(())
    }

    pub fn end_processing(&mut self) {
        self.state = BufferState::Ready;
    }

    /// Appends a tag with no payload.
    pub fn write_op(&mut self, op: CommandOp) -> Result<(), CommandError> {
        self.write_raw(op, &[], &[])
    }

    /// Appends a tag followed by the raw bytes of `payload`.
    pub fn write<P: Pod>(&mut self, op: CommandOp, payload: &P) -> Result<(), CommandError> {
        self.write_raw(op, bytemuck::bytes_of(payload), &[])
    }

    /// Appends a tag, the raw bytes of `payload`, then `data` inline.
    ///
    /// The record is responsible for carrying `data.len()` in one of its
    /// fields so the reader knows how many trailing bytes to consume.
    pub fn write_with_data<P: Pod>(
        &mut self,
        op: CommandOp,
        payload: &P,
        data: &[u8],
    ) -> Result<(), CommandError> {
        self.write_raw(op, bytemuck::bytes_of(payload), &[data])
    }

    /// Like [`write_with_data`](Self::write_with_data) but with two inline
    /// blobs back to back. The record carries both lengths.
    pub fn write_with_data_pair<P: Pod>(
        &mut self,
        op: CommandOp,
        payload: &P,
        first: &[u8],
        second: &[u8],
    ) -> Result<(), CommandError> {
        self.write_raw(op, bytemuck::bytes_of(payload), &[first, second])
    }

    fn write_raw(
        &mut self,
        op: CommandOp,
        payload: &[u8],
        data: &[&[u8]],
    ) -> Result<(), CommandError> {
        if self.state != BufferState::Recording {
            error!(
                state = ?self.state,
                ?op,
                "commands can only be written between begin_recording and end_recording"
            );
            return Err(CommandError::BadState(self.state));
        }

        // One uniform capacity check: tag byte + record + trailing data.
        let data_len: usize = data.iter().map(|d| d.len()).sum();
        let requested = 1 + payload.len() + data_len;
        if self.cursor + requested > self.bytes.len() {
            error!(
                ?op,
                requested,
                remaining = self.remaining(),
                "attempted to write to a full command buffer"
            );
            return Err(CommandError::Overflow {
                requested,
                remaining: self.remaining(),
            });
        }

        let at = self.cursor;
        self.bytes[at] = op as u8;
        self.bytes[at + 1..at + 1 + payload.len()].copy_from_slice(payload);
        let mut data_at = at + 1 + payload.len();
        for blob in data {
            self.bytes[data_at..data_at + blob.len()].copy_from_slice(blob);
            data_at += blob.len();
        }

        // Publish after the payload lands so a cross-thread inspector never
        // observes a cursor past bytes that are still being written.
        fence(Ordering::Release);
        self.cursor += requested;
        self.size = self.cursor;

        Ok(())
    }

    /// Reads the next tag byte, or `None` once the recorded size is reached.
    pub fn read_tag(&mut self) -> Option<u8> {
        if self.cursor + 1 > self.size {
            return None;
        }
        let tag = self.bytes[self.cursor];
        self.cursor += 1;
        Some(tag)
    }

    /// Reads one fixed-layout record, advancing the cursor by its size.
    ///
    /// The caller must know the record type from the tag it just read; reads
    /// past the recorded size return `None`.
    pub fn read<P: Pod>(&mut self) -> Option<P> {
        let len = core::mem::size_of::<P>();
        if self.cursor + len > self.size {
            return None;
        }
        let value = bytemuck::pod_read_unaligned(&self.bytes[self.cursor..self.cursor + len]);
        self.cursor += len;
        Some(value)
    }

    /// Reads `len` inline bytes written with
    /// [`write_with_data`](Self::write_with_data).
    pub fn read_bytes(&mut self, len: usize) -> Option<&[u8]> {
        if self.cursor + len > self.size {
            return None;
        }
        let bytes = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Some(bytes)
    }

    /// Reads two adjacent inline blobs written with
    /// [`write_with_data_pair`](Self::write_with_data_pair).
    pub fn read_bytes_pair(&mut self, first: usize, second: usize) -> Option<(&[u8], &[u8])> {
        let total = first + second;
        if self.cursor + total > self.size {
            return None;
        }
        let bytes = &self.bytes[self.cursor..self.cursor + total];
        self.cursor += total;
        Some(bytes.split_at(first))
    }

    /// Rewinds the cursor for replay without touching the contents.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Zeroes the buffer and resets cursor, size and state for a new
    /// recording pass. A buffer still being processed is left untouched.
    pub fn clear(&mut self) {
        if self.state == BufferState::Processing {
            error!("clear on a buffer that is still processing");
            return;
        }
        self.bytes.fill(0);
        self.cursor = 0;
        self.size = 0;
        self.state = BufferState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{CreateVertexBufferData, SetVertexBufferData};

    fn recording(capacity: usize) -> CommandBuffer {
        let mut buf = CommandBuffer::with_capacity(capacity);
        buf.begin_recording().unwrap();
        buf
    }

    #[test]
    fn tagged_writes_round_trip_in_order() {
        let mut buf = recording(256);

        buf.write_op(CommandOp::Init).unwrap();
        let set = SetVertexBufferData {
            id: 7,
            first_vertex: 0,
            count: 3,
        };
        buf.write(CommandOp::SetVertexBuffer, &set).unwrap();
        buf.write_op(CommandOp::Draw).unwrap();
        buf.end_recording().unwrap();

        buf.reset_cursor();
        assert_eq!(buf.read_tag(), Some(CommandOp::Init as u8));
        assert_eq!(buf.read_tag(), Some(CommandOp::SetVertexBuffer as u8));
        assert_eq!(buf.read::<SetVertexBufferData>(), Some(set));
        assert_eq!(buf.read_tag(), Some(CommandOp::Draw as u8));
        assert_eq!(buf.read_tag(), None);
    }

    #[test]
    fn inline_data_round_trips_byte_identical() {
        let mut buf = recording(256);
        let vertices: Vec<u8> = (0..64).collect();
        let record = CreateVertexBufferData {
            id: 1,
            usage: 1,
            data_size: vertices.len() as u32,
        };
        buf.write_with_data(CommandOp::CreateVertexBuffer, &record, &vertices)
            .unwrap();

        buf.reset_cursor();
        assert_eq!(buf.read_tag(), Some(CommandOp::CreateVertexBuffer as u8));
        let decoded: CreateVertexBufferData = buf.read().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(buf.read_bytes(decoded.data_size as usize), Some(&vertices[..]));
    }

    #[test]
    fn overflow_is_non_corrupting() {
        // Room for the tag plus a 12-byte record, and nothing else.
        let mut buf = recording(13 + 4);

        let big = [0u8; 64];
        let record = CreateVertexBufferData {
            id: 1,
            usage: 0,
            data_size: big.len() as u32,
        };
        let err = buf
            .write_with_data(CommandOp::CreateVertexBuffer, &record, &big)
            .unwrap_err();
        assert!(matches!(err, CommandError::Overflow { .. }));
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.size(), 0);

        // A write that fits must land at the pre-overflow position.
        let set = SetVertexBufferData {
            id: 2,
            first_vertex: 0,
            count: 6,
        };
        buf.write(CommandOp::SetVertexBuffer, &set).unwrap();
        assert_eq!(buf.size(), 13);

        buf.reset_cursor();
        assert_eq!(buf.read_tag(), Some(CommandOp::SetVertexBuffer as u8));
        assert_eq!(buf.read::<SetVertexBufferData>(), Some(set));
    }

    #[test]
    fn writes_outside_recording_are_rejected_no_ops() {
        let mut buf = CommandBuffer::with_capacity(64);
        let err = buf.write_op(CommandOp::Draw).unwrap_err();
        assert_eq!(err, CommandError::BadState(BufferState::Ready));
        assert_eq!(buf.size(), 0);

        buf.begin_recording().unwrap();
        buf.write_op(CommandOp::Draw).unwrap();
        buf.end_recording().unwrap();

        let err = buf.write_op(CommandOp::Draw).unwrap_err();
        assert_eq!(err, CommandError::BadState(BufferState::Ready));
        assert_eq!(buf.size(), 1);
    }

    #[test]
    fn clear_resets_for_a_new_pass_but_not_while_processing() {
        let mut buf = recording(64);
        buf.write_op(CommandOp::Draw).unwrap();
        buf.end_recording().unwrap();

        buf.start_processing().unwrap();
        buf.clear();
        assert_eq!(buf.size(), 1, "clear while processing must be a no-op");

        buf.end_processing();
        buf.clear();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.state(), BufferState::Ready);
    }

    #[test]
    fn reads_stop_at_recorded_size_not_capacity() {
        let mut buf = recording(128);
        buf.write_op(CommandOp::Draw).unwrap();
        buf.end_recording().unwrap();

        buf.reset_cursor();
        assert_eq!(buf.read_tag(), Some(CommandOp::Draw as u8));
        // Plenty of capacity left, but nothing recorded.
        assert_eq!(buf.read_tag(), None);
        assert_eq!(buf.read::<SetVertexBufferData>(), None);
        assert_eq!(buf.read_bytes(1), None);
    }
}
