//! Streaming zlib codecs for MCCP.
//!
//! An endpoint direction is either passthrough or owns one live codec:
//!
//! | Direction | Type         | Created by                   | Removed by                       |
//! |-----------|--------------|------------------------------|----------------------------------|
//! | inbound   | [`Inflater`] | `IAC SB MCCP2 IAC SE` (game) | peer ends the zlib stream        |
//! | outbound  | [`Deflater`] | `IAC DO MCCP2` (client)      | `IAC DONT MCCP2` (client)        |
//!
//! Neither codec touches a transport. The inflater pulls raw bytes through a
//! caller-supplied fill closure and the deflater pushes compressed bytes
//! through a sink closure, so the endpoint keeps ownership of the socket and
//! of the write backlog.
//!
//! ```text
//!  transport --fill--> [ workspace ] --inflate--> input buffer
//!  output    --------> [ deflate   ] --sink-----> transport / backlog
//! ```

mod deflate;
mod inflate;

pub use deflate::Deflater;
pub use inflate::Inflater;

/// Default codec workspace, matching the endpoint buffer size.
pub const DEFAULT_WORKSPACE: usize = crate::buffer::DEFAULT_CAPACITY;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReadOutcome;
    use rand_chacha::rand_core::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Compress `payload` in `chunk`-sized writes, then inflate it back
    /// reading the compressed stream `read_size` bytes at a time.
    fn roundtrip(payload: &[u8], chunk: usize, read_size: usize) -> Vec<u8> {
        let mut deflater = Deflater::with_workspace("game", 512);
        let mut wire = Vec::new();
        for piece in payload.chunks(chunk) {
            let n = deflater
                .write(piece, |out| {
                    wire.extend_from_slice(out);
                    Ok(())
                })
                .unwrap();
            assert_eq!(n, piece.len());
        }

        let mut inflater = Inflater::with_workspace("client", 512);
        let mut cursor = 0;
        let mut restored = Vec::new();
        let mut out = [0u8; 300];
        loop {
            let outcome = inflater
                .read(&mut out, |ws| {
                    if cursor == wire.len() {
                        return Ok(ReadOutcome::WouldBlock);
                    }
                    let n = read_size.min(ws.len()).min(wire.len() - cursor);
                    ws[..n].copy_from_slice(&wire[cursor..cursor + n]);
                    cursor += n;
                    Ok(ReadOutcome::Data(n))
                })
                .unwrap();
            match outcome {
                ReadOutcome::Data(n) => restored.extend_from_slice(&out[..n]),
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Closed => unreachable!(),
            }
        }
        restored
    }

    #[test]
    fn test_random_payload_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x4d55_4421);
        let mut payload = vec![0u8; 5000];
        rng.fill_bytes(&mut payload);

        assert_eq!(roundtrip(&payload, 700, 37), payload);
    }

    #[test]
    fn test_text_payload_roundtrip() {
        let payload: Vec<u8> = b"You are standing in an open field west of a white house.\r\n"
            .iter()
            .copied()
            .cycle()
            .take(4096)
            .collect();

        assert_eq!(roundtrip(&payload, 1000, 1), payload);
        assert_eq!(roundtrip(&payload, 4096, 4096), payload);
    }
}
