use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u64;
const HEADER_SIZE: usize = size_of::<Header>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// One rank's contribution to a collective exchange.
    Part(&'a [f64]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello { rank: usize, world_size: usize },
    Disconnect,
}

/// The application layer message exchanged between the members of a group.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the kind of message, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Part(_)) => "data/part",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(Payload::Part(nums)) => {
                let header = (2 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap()) as u8;

        match kind {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Received a misaligned numeric payload: {err}"),
                    )
                })?;

                Ok(Self::Data(Payload::Part(nums)))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes `msg` into an 8 bytes aligned buffer, as the receiver does.
    fn encode(msg: &Msg<'_>) -> (Vec<u64>, usize) {
        let mut buf = Vec::new();
        if let Some(tail) = msg.serialize(&mut buf) {
            buf.extend_from_slice(tail);
        }

        let mut words = vec![0u64; buf.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..buf.len()].copy_from_slice(&buf);
        (words, buf.len())
    }

    #[test]
    fn part_payload_is_zero_copy() {
        let nums = [1.5, -2.0, f64::INFINITY];
        let (words, len) = encode(&Msg::Data(Payload::Part(&nums)));
        let bytes = &bytemuck::cast_slice::<u64, u8>(&words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(Payload::Part(got)) => assert_eq!(got, nums),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn empty_part() {
        let (words, len) = encode(&Msg::Data(Payload::Part(&[])));
        let bytes = &bytemuck::cast_slice::<u64, u8>(&words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(Payload::Part(got)) => assert!(got.is_empty()),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn hello_command() {
        let cmd = Command::Hello {
            rank: 3,
            world_size: 4,
        };
        let (words, len) = encode(&Msg::Control(cmd));
        let bytes = &bytemuck::cast_slice::<u64, u8>(&words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Control(got) => assert_eq!(
                got,
                Command::Hello {
                    rank: 3,
                    world_size: 4
                }
            ),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0u8; 3]).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = 9u64.to_be_bytes();
        assert!(Msg::deserialize(&buf).is_err());
    }
}
