use capture_bus::packet::EncodedStream;

/// Concatenates the packs of one stream, in encoder order, into a single
/// access unit.
pub fn reassemble(stream: &EncodedStream) -> Vec<u8> {
    let mut buf = Vec::with_capacity(stream.total_len());
    for pack in stream.packs() {
        buf.extend_from_slice(pack.data());
    }
    buf
}
