//! DTLS 1.2 record layer framing.

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::util::be_u48;
use crate::Error;

/// The fixed 13 byte DTLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    /// The content type of this record.
    pub content_type: ContentType,
    /// The protocol version.
    pub version: ProtocolVersion,
    /// The epoch and sequence number.
    pub sequence: Sequence,
    /// The length of the fragment following the header.
    pub length: u16,
}

impl RecordHeader {
    /// DTLS record header length: content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const LEN: usize = 13;

    /// Largest fragment of a protected record, 2^14 + 2048.
    pub const MAX_FRAGMENT_LEN: usize = 16_384 + 2048;

    pub fn new(content_type: ContentType, sequence: Sequence, length: u16) -> Self {
        RecordHeader {
            content_type,
            version: ProtocolVersion::DTLS1_2,
            sequence,
            length,
        }
    }

    /// Parse only the header fields.
    pub fn parse(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?; // u8
        let (input, version) = ProtocolVersion::parse(input)?; // u16
        let (input, epoch) = be_u16(input)?; // u16
        let (input, sequence_number) = be_u48(input)?; // u48
        let (input, length) = be_u16(input)?; // u16

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                sequence: Sequence {
                    epoch,
                    sequence_number,
                },
                length,
            },
        ))
    }

    /// Offset one past the last byte of this record, relative to the start
    /// of its header.
    pub fn record_end(&self) -> Result<usize, Error> {
        Self::LEN
            .checked_add(self.length as usize)
            .ok_or(Error::MalformedRecord("record length overflows"))
    }

    /// Parse the record at the start of `input`.
    ///
    /// Returns the header, the fragment, and the offset where the next
    /// record starts. The content type and version are not validated here;
    /// a record with unknown framing values still has a well defined end,
    /// which lets the caller skip it and carry on with the rest of the
    /// datagram.
    pub fn parse_record(input: &[u8]) -> Result<(RecordHeader, &[u8], usize), Error> {
        let (_, header) = Self::parse(input).map_err(|_| Error::ParseIncomplete)?;
        let end = header.record_end()?;

        if input.len() < end {
            return Err(Error::ParseIncomplete);
        }

        Ok((header, &input[Self::LEN..end], end))
    }

    /// Whether the content type, version and length are ones we process.
    pub fn is_acceptable(&self) -> bool {
        !matches!(self.content_type, ContentType::Unknown(_))
            && self.version.is_supported()
            && self.length as usize <= Self::MAX_FRAGMENT_LEN
    }

    /// Serialize this header followed by `fragment`.
    pub fn serialize(&self, fragment: &[u8], output: &mut Buf) {
        debug_assert_eq!(self.length as usize, fragment.len());
        output.push(self.content_type.as_u8());
        output.extend_from_slice(&self.version.as_u16().to_be_bytes());
        output.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        output.extend_from_slice(&self.sequence.sequence_number.to_be_bytes()[2..]);
        output.extend_from_slice(&self.length.to_be_bytes());
        output.extend_from_slice(fragment);
    }
}

/// The records of one datagram.
///
/// Yields each complete record slice (header included). A truncated header,
/// or a length running past the end of the datagram, ends the iteration:
/// there is no way to find the next record boundary after that.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    packet: &'a [u8],
}

impl<'a> Records<'a> {
    pub fn new(packet: &'a [u8]) -> Self {
        Records { packet }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.packet.is_empty() {
            return None;
        }

        match RecordHeader::parse_record(self.packet) {
            Ok((_, _, end)) => {
                let (record, rest) = self.packet.split_at(end);
                self.packet = rest;
                Some(record)
            }
            Err(e) => {
                trace!("Discarding {} trailing datagram bytes: {}", self.packet.len(), e);
                self.packet = &[];
                None
            }
        }
    }
}
