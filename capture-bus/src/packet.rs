use bytes::Bytes;

/// Result of polling an encoder channel for a completed stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Timeout,
}

/// One packet of an encoded access unit (a NAL unit, a JPEG segment, ...).
#[derive(Clone, Debug)]
pub struct Pack {
    data: Bytes,
    pts: i64,
    is_key: bool,
}

impl Pack {
    pub fn new(data: Bytes, pts: i64, is_key: bool) -> Self {
        Self { data, pts, is_key }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }
}

/// Stream descriptor handed out by `get_stream`. The packs are in the order
/// the encoder produced them. The descriptor must be handed back with
/// `release_stream` so the encoder can reuse the slot.
#[derive(Debug)]
pub struct EncodedStream {
    seq: u64,
    packs: Vec<Pack>,
}

impl EncodedStream {
    pub fn new(seq: u64, packs: Vec<Pack>) -> Self {
        Self { seq, packs }
    }

    /// Sequence number assigned by the encoder channel.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    /// Sum of all pack lengths.
    pub fn total_len(&self) -> usize {
        self.packs.iter().map(Pack::len).sum()
    }
}
