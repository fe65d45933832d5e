//! Decoder for the live-view packet format.
//!
//! Every packet is an 8 byte common header, a 128 byte payload header, the
//! JPEG payload and trailing padding. All integers are big-endian.

use bytes::Bytes;

use crate::types::CameraError;

pub const COMMON_HEADER_LEN: usize = 8;
pub const PAYLOAD_HEADER_LEN: usize = 128;

const START_BYTE: u8 = 0xFF;
const PAYLOAD_TYPE_IMAGE: u8 = 0x01;
const PAYLOAD_MAGIC: [u8; 4] = [0x24, 0x35, 0x68, 0x79];

/// One decoded live-view picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u16,
    pub timestamp: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub sequence: u16,
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub data_size: usize,
    pub padding_size: usize,
}

impl PayloadHeader {
    pub fn body_len(&self) -> usize {
        self.data_size + self.padding_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("unexpected common header {0:02x?}")]
    CommonHeader([u8; 2]),
    #[error("unexpected payload header {0:02x?}")]
    PayloadHeader([u8; 4]),
    #[error("need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },
}

impl From<FramingError> for CameraError {
    fn from(err: FramingError) -> Self {
        CameraError::Framing(err.to_string())
    }
}

pub struct StreamFramer;

impl StreamFramer {
    pub fn parse_common_header(bytes: &[u8]) -> Result<CommonHeader, FramingError> {
        ensure_len(bytes, COMMON_HEADER_LEN)?;
        if bytes[0] != START_BYTE || bytes[1] != PAYLOAD_TYPE_IMAGE {
            return Err(FramingError::CommonHeader([bytes[0], bytes[1]]));
        }
        Ok(CommonHeader {
            sequence: read_uint(&bytes[2..4]) as u16,
            timestamp: read_uint(&bytes[4..8]),
        })
    }

    pub fn parse_payload_header(bytes: &[u8]) -> Result<PayloadHeader, FramingError> {
        ensure_len(bytes, PAYLOAD_HEADER_LEN)?;
        if bytes[..4] != PAYLOAD_MAGIC {
            return Err(FramingError::PayloadHeader([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]));
        }
        Ok(PayloadHeader {
            data_size: read_uint(&bytes[4..7]) as usize,
            padding_size: bytes[7] as usize,
        })
    }

    /// Decode the packet at the start of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. Nothing is
    /// consumed on error.
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize), FramingError> {
        let common = Self::parse_common_header(buf)?;
        let payload = Self::parse_payload_header(&buf[COMMON_HEADER_LEN..])?;

        let data_start = COMMON_HEADER_LEN + PAYLOAD_HEADER_LEN;
        let total = data_start + payload.body_len();
        ensure_len(buf, total)?;

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + payload.data_size]);
        Ok((
            Frame {
                sequence: common.sequence,
                timestamp: common.timestamp,
                data,
            },
            total,
        ))
    }
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), FramingError> {
    if bytes.len() < needed {
        return Err(FramingError::Incomplete {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

fn read_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

#[cfg(test)]
pub(crate) fn encode_packet(sequence: u16, payload: &[u8], padding: u8) -> Vec<u8> {
    let mut packet = vec![START_BYTE, PAYLOAD_TYPE_IMAGE];
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&0x0102_0304u32.to_be_bytes());

    let mut header = [0u8; PAYLOAD_HEADER_LEN];
    header[..4].copy_from_slice(&PAYLOAD_MAGIC);
    let size = (payload.len() as u32).to_be_bytes();
    header[4..7].copy_from_slice(&size[1..]);
    header[7] = padding;
    packet.extend_from_slice(&header);

    packet.extend_from_slice(payload);
    packet.extend(std::iter::repeat(0xEE).take(padding as usize));
    packet
}
