//! Length-prefixed bincode frames.
//!
//! Every message on a connection is a big-endian `u32` byte count followed by
//! the bincode encoding of the message. Both the attribute protocol and the
//! blob chunk protocol use this framing.

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WireError};

/// Upper bound on a single frame, to reject garbage length prefixes.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Serialize `msg` and write it as one frame.
pub fn write_frame<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<()> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame and deserialize it.
///
/// A clean EOF before the length prefix yields [`WireError::Closed`].
pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"first".to_string()).unwrap();
        write_frame(&mut buf, &vec![1u32, 2, 3]).unwrap();

        let mut r = Cursor::new(buf);
        let a: String = read_frame(&mut r).unwrap();
        let b: Vec<u32> = read_frame(&mut r).unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, vec![1, 2, 3]);
        assert!(matches!(
            read_frame::<_, String>(&mut r),
            Err(WireError::Closed)
        ));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut r = Cursor::new(buf);
        assert!(matches!(
            read_frame::<_, String>(&mut r),
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"truncated".to_string()).unwrap();
        buf.truncate(buf.len() - 2);
        let mut r = Cursor::new(buf);
        assert!(matches!(
            read_frame::<_, String>(&mut r),
            Err(WireError::Io(_))
        ));
    }
}
