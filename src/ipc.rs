//! Host ↔ DSP mailbox.
//!
//! Two lock-free single-producer/single-consumer rings: requests flow from
//! the host to the DSP and replies flow back. Neither side ever blocks; a
//! full ring hands the message back to the sender.
//!
//! ```text
//! HostPort ──request ring──▶ DspPort ──▶ Pipeline::service_ipc()
//! HostPort ◀──reply ring──── DspPort ◀──┘
//! ```

use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::component::model::ControlFragment;
use crate::component::Trigger;
use crate::error::ErrorCode;
use crate::id::CompId;

/// A request sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    /// Apply a lifecycle trigger.
    Trigger {
        /// Target component.
        comp: CompId,
        /// Trigger to apply.
        trigger: Trigger,
    },
    /// Write one model-blob fragment.
    SetData {
        /// Target component.
        comp: CompId,
        /// The fragment.
        fragment: ControlFragment,
    },
    /// Read one model-blob fragment back.
    GetData {
        /// Target component.
        comp: CompId,
        /// Read request; returned filled in the reply.
        fragment: ControlFragment,
        /// Largest number of bytes the host accepts.
        max_size: usize,
    },
}

impl IpcRequest {
    /// Component the request is addressed to.
    pub fn comp(&self) -> CompId {
        match self {
            Self::Trigger { comp, .. } | Self::SetData { comp, .. } | Self::GetData { comp, .. } => {
                *comp
            }
        }
    }
}

/// The DSP's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcReply {
    /// Component the request was addressed to.
    pub comp: CompId,
    /// Outcome; "already set" transitions are reported as success.
    pub result: Result<(), ErrorCode>,
    /// Filled fragment for a successful `GetData`.
    pub fragment: Option<ControlFragment>,
}

impl IpcReply {
    /// Successful reply without payload.
    pub fn ok(comp: CompId) -> Self {
        Self {
            comp,
            result: Ok(()),
            fragment: None,
        }
    }

    /// Failed reply.
    pub fn error(comp: CompId, code: ErrorCode) -> Self {
        Self {
            comp,
            result: Err(code),
            fragment: None,
        }
    }
}

/// Host side of the mailbox.
pub struct HostPort {
    requests: HeapProd<IpcRequest>,
    replies: HeapCons<IpcReply>,
}

/// DSP side of the mailbox.
pub struct DspPort {
    requests: HeapCons<IpcRequest>,
    replies: HeapProd<IpcReply>,
}

/// Creates a mailbox whose rings each hold `capacity` messages.
///
/// # Example
///
/// ```
/// use pcm_pipeline::{ipc_channel, CompId, IpcRequest, Trigger};
///
/// let (mut host, mut dsp) = ipc_channel(4);
/// host.send(IpcRequest::Trigger { comp: CompId::new(1), trigger: Trigger::Prepare })
///     .unwrap();
/// assert_eq!(dsp.pending(), 1);
/// ```
pub fn ipc_channel(capacity: usize) -> (HostPort, DspPort) {
    let (req_prod, req_cons) = HeapRb::<IpcRequest>::new(capacity.max(1)).split();
    let (rep_prod, rep_cons) = HeapRb::<IpcReply>::new(capacity.max(1)).split();

    (
        HostPort {
            requests: req_prod,
            replies: rep_cons,
        },
        DspPort {
            requests: req_cons,
            replies: rep_prod,
        },
    )
}

impl HostPort {
    /// Queues a request. A full ring returns the request unchanged.
    pub fn send(&mut self, request: IpcRequest) -> Result<(), IpcRequest> {
        self.requests.try_push(request)
    }

    /// Takes the oldest reply, if any.
    pub fn recv(&mut self) -> Option<IpcReply> {
        self.replies.try_pop()
    }

    /// Replies waiting to be read.
    pub fn replies_pending(&self) -> usize {
        self.replies.occupied_len()
    }
}

impl DspPort {
    /// Takes the oldest request, if any.
    pub fn recv(&mut self) -> Option<IpcRequest> {
        self.requests.try_pop()
    }

    /// Queues a reply. A full ring returns the reply unchanged.
    pub fn reply(&mut self, reply: IpcReply) -> Result<(), IpcReply> {
        self.replies.try_push(reply)
    }

    /// Requests waiting to be serviced.
    pub fn pending(&self) -> usize {
        self.requests.occupied_len()
    }

    /// Returns true when the reply ring has room for another reply.
    pub fn can_reply(&self) -> bool {
        self.replies.vacant_len() > 0
    }
}

impl std::fmt::Debug for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPort")
            .field("queued", &self.requests.occupied_len())
            .field("replies", &self.replies.occupied_len())
            .finish()
    }
}

impl std::fmt::Debug for DspPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DspPort")
            .field("pending", &self.requests.occupied_len())
            .field("replies", &self.replies.occupied_len())
            .finish()
    }
}
