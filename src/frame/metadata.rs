use super::SYNTHESIZE;
use crate::{alloc::Ticket, Error, Result};

/// A frame of UTF-8 XML metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    pub data: String,

    /// Timecode in 100ns ticks, or [`SYNTHESIZE`].
    pub timecode: i64,

    pub(crate) ticket: Option<Ticket>,
}

impl MetadataFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            timecode: SYNTHESIZE,
            ticket: None,
        }
    }

    /// Build a frame from a raw buffer of `length` bytes, or up to the first nul when `length` is `0`.
    pub fn from_raw(buffer: &[u8], length: usize) -> Result<Self> {
        let bytes = match length {
            0 => buffer
                .iter()
                .position(|byte| *byte == 0)
                .map_or(buffer, |end| &buffer[..end]),
            length => buffer.get(..length).ok_or_else(|| {
                Error::InvalidFrame(format!(
                    "metadata of {length} bytes in a buffer of {}",
                    buffer.len()
                ))
            })?,
        };

        let data = std::str::from_utf8(bytes)
            .map_err(|err| Error::InvalidFrame(format!("metadata is not UTF-8: {err}")))?;

        Ok(Self::new(data))
    }

    pub fn with_timecode(mut self, timecode: i64) -> Self {
        self.timecode = timecode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_length_stops_at_nul() {
        let frame = MetadataFrame::from_raw(b"<a/>\0garbage", 0).expect("valid metadata");

        assert_eq!(frame.data, "<a/>");
        assert_eq!(frame.timecode, SYNTHESIZE);
    }

    #[test]
    fn explicit_length() {
        let frame = MetadataFrame::from_raw(b"<a/><b/>", 4).expect("valid metadata");
        assert_eq!(frame.data, "<a/>");

        assert!(MetadataFrame::from_raw(b"<a/>", 12).is_err());
        assert!(MetadataFrame::from_raw(&[0xff, 0xfe], 2).is_err());
    }
}
