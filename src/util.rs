use nom::bytes::complete::take;
use nom::IResult;

/// Big endian 48 bit integer, the DTLS record sequence number.
pub fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, bytes) = take(6_usize)(input)?;
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok((rest, value))
}

/// Write the low 24 bits of `value` big endian.
pub fn put_u24(out: &mut [u8], value: u32) {
    out[..3].copy_from_slice(&value.to_be_bytes()[1..]);
}
