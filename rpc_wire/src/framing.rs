// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Record-mark framing for stream transports (TCP, Unix sockets, the
//! in-process [`crate::pipe`]), grounded on the teacher's
//! `rpc_protocol` record-mark helpers.

use std::io::Read;

/// Writes space for a record mark at the head of `buf`, to be filled in later
/// by [`update_record_mark`] once the message length is known.
pub fn buf_with_dummy_record_mark() -> Vec<u8> {
    vec![0, 0, 0, 0]
}

/// Given a buffer prefaced by a dummy record mark, fills in the mark based on
/// the buffer's actual length.
pub fn update_record_mark(buf: &mut [u8]) {
    let message_size = u32::try_from(buf.len() - 4).expect("frame too large to mark");
    let record_mark: u32 = message_size | (1 << 31);
    buf[..4].copy_from_slice(&record_mark.to_be_bytes());
}

/// Reads 4 bytes from `stream` and interprets them as a record mark.
pub fn stream_record_mark<S: Read>(stream: &mut S) -> Result<u32, crate::Error> {
    let mut record_mark_bytes: [u8; 4] = [0; 4];
    stream.read_exact(&mut record_mark_bytes)?;
    decode_record_mark(&record_mark_bytes)
}

/// Returns the length indicated by a record mark, or an error if the mark
/// indicates a fragmented record (unsupported by this transport).
pub fn decode_record_mark(mark: &[u8; 4]) -> Result<u32, crate::Error> {
    let record_mark = u32::from_be_bytes(*mark);

    if (record_mark & (1 << 31)) == 0 {
        return Err(crate::Error::Protocol(crate::ProtocolError::MessageFragment));
    }

    Ok(record_mark & !(1 << 31))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record_mark() {
        let mut buf = buf_with_dummy_record_mark();
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        update_record_mark(&mut buf);

        let mark: [u8; 4] = buf[..4].try_into().unwrap();
        assert_eq!(decode_record_mark(&mark).unwrap(), 6);
    }

    #[test]
    fn rejects_a_fragment_mark() {
        // top bit clear means "more fragments follow".
        let mark = 6u32.to_be_bytes();
        assert!(matches!(
            decode_record_mark(&mark),
            Err(crate::Error::Protocol(crate::ProtocolError::MessageFragment))
        ));
    }
}
