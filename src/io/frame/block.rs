use std::io::{Cursor, Read};

use binrw::{
    meta::{ReadEndian, WriteEndian},
    BinRead, BinResult, BinWrite,
};

use crate::Result;

/// The two parts of a frame segment, its fixed-layout `header` and the variable `data` following it.
#[derive(Debug, PartialEq)]
pub struct Block<H, D> {
    pub header: H,
    pub data: D,
}

impl<H: Default, D> Block<H, D> {
    /// A block with a default header around `data`.
    pub fn with_payload(data: impl Into<D>) -> Self {
        Self {
            header: H::default(),
            data: data.into(),
        }
    }
}

fn parse<T>(bytes: &[u8]) -> BinResult<T>
where
    T: for<'a> BinRead<Args<'a> = ()> + ReadEndian,
{
    T::read(&mut Cursor::new(bytes))
}

fn serialize<T>(value: &T) -> BinResult<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()> + WriteEndian,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write(&mut cursor)?;

    Ok(cursor.into_inner())
}

impl<H, D> Block<H, D>
where
    H: for<'a> BinRead<Args<'a> = ()> + ReadEndian,
    D: for<'a> BinRead<Args<'a> = ()> + ReadEndian,
{
    pub fn from_raw(header: &[u8], data: &[u8]) -> Result<Self> {
        Ok(Self {
            header: parse(header)?,
            data: parse(data)?,
        })
    }
}

impl<H, D> Block<H, D>
where
    H: for<'a> BinWrite<Args<'a> = ()> + WriteEndian,
    D: for<'a> BinWrite<Args<'a> = ()> + WriteEndian,
{
    pub fn to_raw(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((serialize(&self.header)?, serialize(&self.data)?))
    }
}

/// Opaque bytes filling the remainder of a segment, such as pixels or samples.
#[derive(Debug, Default, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct Payload(#[br(parse_with = remainder)] Vec<u8>);

#[binrw::parser(reader)]
fn remainder() -> BinResult<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    Ok(bytes)
}

impl std::ops::Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, BinRead, BinWrite)]
    #[brw(little)]
    struct Header {
        length: u16,
    }

    #[test]
    fn payload_takes_the_remaining_bytes() {
        let block = Block::<Header, Payload>::from_raw(&[3, 0], b"abc").expect("valid block");

        assert_eq!(block.header.length, 3);
        assert_eq!(&*block.data, b"abc");
        assert_eq!(
            block.to_raw().expect("encodable block"),
            (vec![3, 0], b"abc".to_vec())
        );
    }

    #[test]
    fn short_headers_are_refused() {
        assert!(Block::<Header, Payload>::from_raw(&[3], b"abc").is_err());
    }
}
