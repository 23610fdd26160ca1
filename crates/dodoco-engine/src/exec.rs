//! Exec output and the engine's multiplexed stream format.

/// Output from an exec command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command. Holds both streams when the
    /// output was not demultiplexed.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i64,
}

const HEADER_LEN: usize = 8;
const STREAM_STDERR: u8 = 2;

/// Splits a framed exec stream into stdout and stderr.
///
/// Each frame is an 8-byte header (`[stream, 0, 0, 0, len_be32]`) followed by
/// `len` payload bytes. With `demux` off, both streams are concatenated in
/// arrival order into the first buffer. A truncated trailing frame is kept
/// as far as it goes.
#[must_use]
pub fn split_stream(raw: &[u8], demux: bool) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = raw;

    while rest.len() >= HEADER_LEN {
        let stream = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (HEADER_LEN + len).min(rest.len());
        let payload = &rest[HEADER_LEN..end];
        if demux && stream == STREAM_STDERR {
            stderr.extend_from_slice(payload);
        } else {
            stdout.extend_from_slice(payload);
        }
        rest = &rest[end..];
    }
    (stdout, stderr)
}

/// Encodes a payload as a single frame. Used by the in-memory engine.
#[must_use]
pub fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&[stream, 0, 0, 0]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleaved() -> Vec<u8> {
        let mut raw = frame(1, b"out1 ");
        raw.extend(frame(2, b"err1 "));
        raw.extend(frame(1, b"out2"));
        raw
    }

    #[test]
    fn demux_separates_streams() {
        let (out, err) = split_stream(&interleaved(), true);
        assert_eq!(out, b"out1 out2");
        assert_eq!(err, b"err1 ");
    }

    #[test]
    fn without_demux_streams_are_merged_in_order() {
        let (out, err) = split_stream(&interleaved(), false);
        assert_eq!(out, b"out1 err1 out2");
        assert!(err.is_empty());
    }

    #[test]
    fn truncated_frame_is_kept_partially() {
        let mut raw = frame(1, b"hello");
        raw.truncate(HEADER_LEN + 3);
        let (out, _) = split_stream(&raw, true);
        assert_eq!(out, b"hel");
    }

    #[test]
    fn short_garbage_is_ignored() {
        let (out, err) = split_stream(&[1, 0, 0], true);
        assert!(out.is_empty());
        assert!(err.is_empty());
    }
}
