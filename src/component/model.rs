//! Control-data (model blob) transfer.
//!
//! Hosts send large configuration blobs in bounded fragments. The first
//! fragment (index 0) declares the total size and opens a transfer; each
//! fragment is placed at `size - remaining - count`; the fragment with no
//! elements remaining completes it. A completed blob replaces the active one
//! at once when the component is idle, otherwise it waits for the next
//! prepare.

use crate::component::CompState;
use crate::config::MAX_CONTROL_CHUNK;
use crate::pipeline::ring_buffer::alloc_zeroed;
use crate::ComponentError;

/// Control protocol version stamped on read-back payloads.
pub const ABI_VERSION: u32 = (3 << 24) | (17 << 12);

/// Blob header and the bytes carried by one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobPayload {
    /// Declared size of the whole blob in bytes.
    pub size: u32,
    /// Control protocol version.
    pub abi: u32,
    /// Fragment bytes.
    pub data: Vec<u8>,
}

/// One control-data message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlFragment {
    /// Position of this fragment in the transfer; 0 opens a new transfer.
    pub msg_index: u32,
    /// Bytes carried by this fragment.
    pub num_elems: u32,
    /// Bytes still to come after this fragment.
    pub elems_remaining: u32,
    /// Header and bytes.
    pub data: BlobPayload,
}

impl ControlFragment {
    /// Splits a blob into fragments of at most `chunk` bytes.
    ///
    /// An empty blob gives a single empty fragment.
    pub fn split(blob: &[u8], chunk: usize) -> Vec<Self> {
        let size = u32::try_from(blob.len()).unwrap_or(u32::MAX);
        if blob.is_empty() || chunk == 0 {
            return vec![Self {
                data: BlobPayload {
                    size,
                    abi: ABI_VERSION,
                    data: Vec::new(),
                },
                ..Self::default()
            }];
        }

        let mut sent = 0usize;
        blob.chunks(chunk)
            .enumerate()
            .map(|(idx, bytes)| {
                sent += bytes.len();
                Self {
                    msg_index: u32::try_from(idx).unwrap_or(u32::MAX),
                    num_elems: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
                    elems_remaining: u32::try_from(blob.len() - sent).unwrap_or(u32::MAX),
                    data: BlobPayload {
                        size,
                        abi: ABI_VERSION,
                        data: bytes.to_vec(),
                    },
                }
            })
            .collect()
    }

    /// Builds a read-back request for `num_elems` bytes with `elems_remaining` after them.
    pub fn read_request(msg_index: u32, num_elems: u32, elems_remaining: u32) -> Self {
        Self {
            msg_index,
            num_elems,
            elems_remaining,
            data: BlobPayload::default(),
        }
    }
}

/// Control command delivered to a component.
#[derive(Debug)]
pub enum ControlCmd<'a> {
    /// Write one fragment of the model blob.
    SetData(&'a ControlFragment),
    /// Read one fragment of the model blob back.
    GetData {
        /// Request in, filled fragment out.
        fragment: &'a mut ControlFragment,
        /// Largest number of bytes the caller accepts.
        max_size: usize,
    },
}

/// Reassembly state of a component's model blob.
#[derive(Debug, Default)]
pub struct ModelHandler {
    data: Option<Vec<u8>>,
    data_new: Option<Vec<u8>>,
    data_size: usize,
    crc: u32,
    ready: bool,
}

impl ModelHandler {
    /// Creates a handler holding no blob.
    pub fn new() -> Self {
        Self::default()
    }

    /// The active blob.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Returns true while a transfer is open or a completed blob waits for prepare.
    pub fn has_pending(&self) -> bool {
        self.data_new.is_some()
    }

    /// Declared size of the last blob.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// CRC-32 of the last completed blob.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Returns true once the last transfer completed.
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Drops both blobs and clears size and checksum.
    pub fn free(&mut self) {
        self.data = None;
        self.data_new = None;
        self.data_size = 0;
        self.crc = 0;
    }

    /// Installs a blob of `size` bytes, zeroed or copied from `init`.
    ///
    /// A size of 0 leaves the handler empty.
    pub fn alloc(&mut self, size: usize, init: Option<&[u8]>) -> Result<(), ComponentError> {
        if let Some(init) = init.filter(|init| init.len() != size) {
            return Err(ComponentError::invalid_argument(format!(
                "initial model is {} bytes, expected {size}",
                init.len()
            )));
        }

        self.free();
        if size == 0 {
            return Ok(());
        }

        let mut data = alloc_zeroed(size)?;
        if let Some(init) = init {
            data.copy_from_slice(init);
        }

        self.crc = crc32fast::hash(&data);
        self.data = Some(data);
        self.data_size = size;
        self.ready = true;
        Ok(())
    }

    /// Accepts one fragment of a new blob.
    ///
    /// `state` is the component state at the time of the call; it decides
    /// whether a completed blob replaces the active one immediately.
    pub fn set_cmd(&mut self, state: CompState, fragment: &ControlFragment) -> Result<(), ComponentError> {
        tracing::debug!(
            msg_index = fragment.msg_index,
            num_elems = fragment.num_elems,
            remaining = fragment.elems_remaining,
            "model set"
        );

        if fragment.msg_index == 0 {
            if self.data_new.is_some() {
                tracing::error!("busy with previous model request");
                return Err(ComponentError::Busy);
            }
            if fragment.data.size == 0 {
                return Ok(());
            }
        }

        let (offset, bytes) = fragment_range(fragment).inspect_err(|e| {
            tracing::error!(error = %e, "bad model fragment");
        })?;

        if fragment.msg_index == 0 {
            let size = fragment.data.size as usize;
            self.data_new = Some(alloc_zeroed(size)?);
            self.data_size = size;
            self.ready = false;
        }

        let Some(data_new) = self.data_new.as_mut() else {
            tracing::error!("model fragment without open transfer");
            return Err(ComponentError::ModelNotAllocated);
        };

        let count = bytes.len();
        if offset + count > data_new.len() {
            tracing::error!(offset, count, size = data_new.len(), "model fragment out of bounds");
            return Err(ComponentError::invalid_argument(format!(
                "fragment at {offset} of {count} bytes overruns {} byte blob",
                data_new.len()
            )));
        }

        data_new[offset..offset + count].copy_from_slice(bytes);

        if fragment.elems_remaining == 0 {
            self.complete(state);
        }
        Ok(())
    }

    fn complete(&mut self, state: CompState) {
        self.ready = true;

        if state == CompState::Ready {
            self.data = None;
        }
        if self.data.is_none() {
            self.data = self.data_new.take();
        }

        let finalized = self.data_new.as_deref().or(self.data.as_deref()).unwrap_or_default();
        self.crc = crc32fast::hash(finalized);

        tracing::debug!(size = self.data_size, crc = format_args!("{:#010x}", self.crc), "model complete");
    }

    /// Swaps a completed pending blob in. Returns true if one was applied.
    pub fn apply_pending(&mut self) -> bool {
        if !self.ready || self.data_new.is_none() {
            return false;
        }
        self.data = self.data_new.take();
        tracing::debug!(size = self.data_size, "pending model applied");
        true
    }

    /// Fills `fragment` with the bytes it asks for from the active blob.
    ///
    /// The request's `num_elems` and `elems_remaining` select the range with
    /// the same offset rule as [`set_cmd()`](Self::set_cmd). Without an
    /// active blob the reply reports size 0.
    pub fn get_cmd(&self, fragment: &mut ControlFragment, max_size: usize) -> Result<(), ComponentError> {
        let Some(data) = self.data.as_deref() else {
            tracing::warn!("model data not allocated yet");
            fragment.data.abi = ABI_VERSION;
            fragment.data.size = 0;
            fragment.data.data.clear();
            return Ok(());
        };

        let count = fragment.num_elems as usize;
        if count > max_size.min(MAX_CONTROL_CHUNK) {
            tracing::error!(count, max_size, "invalid read-back size");
            return Err(ComponentError::invalid_argument(format!(
                "read-back of {count} bytes exceeds {max_size}"
            )));
        }

        let offset = data
            .len()
            .checked_sub(fragment.elems_remaining as usize)
            .and_then(|rest| rest.checked_sub(count))
            .ok_or_else(|| {
                ComponentError::invalid_argument(format!(
                    "read-back of {count} bytes with {} remaining exceeds {} byte blob",
                    fragment.elems_remaining,
                    data.len()
                ))
            })?;

        fragment.data.data = data[offset..offset + count].to_vec();
        fragment.data.abi = ABI_VERSION;
        fragment.data.size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Ok(())
    }
}

/// Validates a fragment against its own header and returns its offset and bytes.
fn fragment_range(fragment: &ControlFragment) -> Result<(usize, &[u8]), ComponentError> {
    let count = fragment.num_elems as usize;
    let offset = (fragment.data.size as usize)
        .checked_sub(fragment.elems_remaining as usize)
        .and_then(|rest| rest.checked_sub(count))
        .ok_or_else(|| {
            ComponentError::invalid_argument(format!(
                "fragment of {count} bytes with {} remaining does not fit a {} byte blob",
                fragment.elems_remaining, fragment.data.size
            ))
        })?;
    let bytes = fragment.data.data.get(..count).ok_or_else(|| {
        ComponentError::invalid_argument(format!(
            "fragment declares {count} bytes but carries {}",
            fragment.data.data.len()
        ))
    })?;
    Ok((offset, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn fragment(index: u32, bytes: &[u8], remaining: u32, size: u32) -> ControlFragment {
        ControlFragment {
            msg_index: index,
            num_elems: bytes.len() as u32,
            elems_remaining: remaining,
            data: BlobPayload {
                size,
                abi: ABI_VERSION,
                data: bytes.to_vec(),
            },
        }
    }

    #[test]
    fn test_ten_bytes_in_three_fragments() {
        let bytes = blob(10);
        let mut model = ModelHandler::new();

        model.set_cmd(CompState::Ready, &fragment(0, &bytes[0..4], 6, 10)).unwrap();
        assert!(!model.ready());
        model.set_cmd(CompState::Ready, &fragment(1, &bytes[4..8], 2, 10)).unwrap();
        model.set_cmd(CompState::Ready, &fragment(2, &bytes[8..10], 0, 10)).unwrap();

        assert!(model.ready());
        assert_eq!(model.data(), Some(bytes.as_slice()));
        assert_eq!(model.data().map(<[u8]>::len), Some(10));
        assert_eq!(model.crc(), crc32fast::hash(&bytes));
        assert!(!model.has_pending());
    }

    #[test]
    fn test_split_matches_offsets() {
        let bytes = blob(10);
        let fragments = ControlFragment::split(&bytes, 4);
        let counts: Vec<_> = fragments.iter().map(|f| (f.num_elems, f.elems_remaining)).collect();
        assert_eq!(counts, vec![(4, 6), (4, 2), (2, 0)]);

        let mut model = ModelHandler::new();
        for f in &fragments {
            model.set_cmd(CompState::Ready, f).unwrap();
        }
        assert_eq!(model.data(), Some(bytes.as_slice()));
    }

    #[test]
    fn test_new_transfer_while_open_is_busy() {
        let bytes = blob(10);
        let mut model = ModelHandler::new();
        model.set_cmd(CompState::Ready, &fragment(0, &bytes[0..4], 6, 10)).unwrap();

        let err = model.set_cmd(CompState::Ready, &fragment(0, &[9; 4], 6, 10)).unwrap_err();
        assert_eq!(err, ComponentError::Busy);

        // The partial transfer still completes with the original bytes.
        model.set_cmd(CompState::Ready, &fragment(1, &bytes[4..8], 2, 10)).unwrap();
        model.set_cmd(CompState::Ready, &fragment(2, &bytes[8..10], 0, 10)).unwrap();
        assert_eq!(model.data(), Some(bytes.as_slice()));
    }

    #[test]
    fn test_zero_size_first_fragment_is_noop() {
        let mut model = ModelHandler::new();
        model.set_cmd(CompState::Ready, &fragment(0, &[], 0, 0)).unwrap();
        assert!(model.data().is_none());
        assert!(!model.has_pending());
    }

    #[test]
    fn test_continuation_without_transfer() {
        let mut model = ModelHandler::new();
        assert_eq!(
            model.set_cmd(CompState::Ready, &fragment(1, &[1, 2], 0, 2)),
            Err(ComponentError::ModelNotAllocated)
        );
    }

    #[test]
    fn test_fragment_out_of_bounds() {
        let mut model = ModelHandler::new();
        assert!(matches!(
            model.set_cmd(CompState::Ready, &fragment(0, &[1, 2, 3, 4], 8, 10)),
            Err(ComponentError::InvalidArgument { .. })
        ));
        assert!(!model.has_pending());
    }

    #[test]
    fn test_continuation_larger_than_transfer() {
        let mut model = ModelHandler::new();
        model.set_cmd(CompState::Ready, &fragment(0, &[1, 2], 2, 4)).unwrap();
        assert!(matches!(
            model.set_cmd(CompState::Ready, &fragment(1, &[3, 4, 5, 6], 0, 8)),
            Err(ComponentError::InvalidArgument { .. })
        ));
        assert!(model.has_pending());
    }

    #[test]
    fn test_completion_while_active_is_deferred() {
        let old = blob(4);
        let new = vec![0xaa; 4];
        let mut model = ModelHandler::new();
        model.alloc(4, Some(&old)).unwrap();

        model.set_cmd(CompState::Active, &fragment(0, &new, 0, 4)).unwrap();
        assert!(model.ready());
        assert!(model.has_pending());
        assert_eq!(model.data(), Some(old.as_slice()));
        assert_eq!(model.crc(), crc32fast::hash(&new));

        assert!(model.apply_pending());
        assert_eq!(model.data(), Some(new.as_slice()));
        assert!(!model.apply_pending());
    }

    #[test]
    fn test_completion_while_ready_replaces_old() {
        let mut model = ModelHandler::new();
        model.alloc(4, None).unwrap();
        assert_eq!(model.data(), Some([0u8; 4].as_slice()));

        model.set_cmd(CompState::Ready, &fragment(0, &[1, 2], 0, 2)).unwrap();
        assert_eq!(model.data(), Some([1u8, 2].as_slice()));
        assert!(!model.has_pending());
    }

    #[test]
    fn test_get_cmd_reads_back_fragments() {
        let bytes = blob(10);
        let mut model = ModelHandler::new();
        model.alloc(10, Some(&bytes)).unwrap();

        let mut request = ControlFragment::read_request(1, 4, 2);
        model.get_cmd(&mut request, MAX_CONTROL_CHUNK).unwrap();

        assert_eq!(request.data.data, bytes[4..8].to_vec());
        assert_eq!(request.data.size, 10);
        assert_eq!(request.data.abi, ABI_VERSION);
    }

    #[test]
    fn test_get_cmd_larger_than_max() {
        let mut model = ModelHandler::new();
        model.alloc(10, None).unwrap();

        let mut request = ControlFragment::read_request(0, 8, 2);
        assert!(model.get_cmd(&mut request, 4).is_err());
    }

    #[test]
    fn test_get_cmd_without_data_reports_zero_size() {
        let model = ModelHandler::new();
        let mut request = ControlFragment::read_request(0, 4, 0);
        request.data.size = 99;

        model.get_cmd(&mut request, MAX_CONTROL_CHUNK).unwrap();
        assert_eq!(request.data.size, 0);
        assert_eq!(request.data.abi, ABI_VERSION);
    }

    #[test]
    fn test_free_clears_everything() {
        let mut model = ModelHandler::new();
        model.alloc(8, None).unwrap();
        model.free();

        assert!(model.data().is_none());
        assert_eq!(model.data_size(), 0);
        assert_eq!(model.crc(), 0);
    }
}
