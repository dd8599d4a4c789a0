use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::types::HandshakeType;
use crate::util::put_u24;

/// The 12 byte DTLS handshake header carried by every fragment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    /// Length of the complete message body.
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    pub const LEN: usize = 12;

    /// Length of the TLS style header (type + length) that prefixes a
    /// reassembled message.
    pub const TLS_LEN: usize = 4;

    pub fn parse(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (rest, raw_type) = be_u8(input)?;
        let Some(msg_type) = HandshakeType::from_u8(raw_type) else {
            return Err(Err::Error(Error::new(input, ErrorKind::Tag)));
        };
        let (rest, length) = be_u24(rest)?;
        let (rest, message_seq) = be_u16(rest)?;
        let (rest, fragment_offset) = be_u24(rest)?;
        let (rest, fragment_length) = be_u24(rest)?;

        Ok((
            rest,
            HandshakeHeader {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    /// Whether this fragment carries less than the whole message.
    pub fn is_fragmented(&self) -> bool {
        self.fragment_offset != 0 || self.fragment_length != self.length
    }

    /// One past the last message byte this fragment covers.
    pub fn fragment_end(&self) -> u32 {
        // Both are 24 bit values, the sum cannot overflow.
        self.fragment_offset + self.fragment_length
    }

    pub fn serialize(&self, body: &[u8], output: &mut Buf) {
        debug_assert_eq!(self.fragment_length as usize, body.len());
        let mut header = [0u8; Self::LEN];
        header[0] = self.msg_type.as_u8();
        put_u24(&mut header[1..], self.length);
        header[4..6].copy_from_slice(&self.message_seq.to_be_bytes());
        put_u24(&mut header[6..], self.fragment_offset);
        put_u24(&mut header[9..], self.fragment_length);
        output.extend_from_slice(&header);
        output.extend_from_slice(body);
    }

    /// Header of the message as if it had been sent in one fragment.
    ///
    /// The transcript hash is defined over this form regardless of how the
    /// message was fragmented on the wire.
    pub(crate) fn unfragmented(&self) -> [u8; Self::LEN] {
        let mut header = [0u8; Self::LEN];
        header[0] = self.msg_type.as_u8();
        put_u24(&mut header[1..], self.length);
        header[4..6].copy_from_slice(&self.message_seq.to_be_bytes());
        // fragment_offset stays 0
        put_u24(&mut header[9..], self.length);
        header
    }
}

/// Split the next handshake fragment off a decrypted handshake record.
///
/// Returns the header, the fragment body and the remaining input. A record
/// may carry several fragments back to back.
pub(crate) fn next_fragment(input: &[u8]) -> Result<(HandshakeHeader, &[u8], &[u8]), &'static str> {
    if input.len() < HandshakeHeader::LEN {
        return Err("short handshake header");
    }

    let (rest, header) = HandshakeHeader::parse(input).map_err(|_| "unknown handshake type")?;

    let (rest, body) = take::<_, _, Error<&[u8]>>(header.fragment_length as usize)(rest)
        .map_err(|_| "fragment body truncated")?;

    if header.fragment_end() > header.length {
        return Err("fragment exceeds message length");
    }

    Ok((header, body, rest))
}
