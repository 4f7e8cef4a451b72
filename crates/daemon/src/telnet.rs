// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Just enough telnet to keep classic MUD clients happy: a line codec that
//! strips IAC command sequences and trailing carriage returns, and decodes
//! the remainder as (lossy) UTF-8.

use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;

/// Remove telnet IAC sequences from a raw line: `IAC IAC` is a literal
/// 255, `IAC SB ... IAC SE` subnegotiations vanish, three-byte option
/// commands vanish, anything else after IAC is dropped with its command.
pub fn strip_iac(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != IAC {
            out.push(input[i]);
            i += 1;
            continue;
        }
        let Some(&command) = input.get(i + 1) else {
            break;
        };
        match command {
            IAC => {
                out.push(IAC);
                i += 2;
            }
            SB => {
                // Swallow to IAC SE.
                let mut j = i + 2;
                while j + 1 < input.len() && !(input[j] == IAC && input[j + 1] == SE) {
                    j += 1;
                }
                i = j + 2;
            }
            251..=254 => {
                // WILL/WONT/DO/DONT plus option byte.
                i += 3;
            }
            _ => {
                i += 2;
            }
        }
    }
    out
}

/// A `\n`-terminated line decoder with telnet and `\r` stripping.
#[derive(Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let Some(newline_at) = src.iter().position(|b| *b == b'\n') else {
            // Guard against a client streaming an endless unterminated line.
            if src.len() > 65536 {
                src.clear();
            }
            return Ok(None);
        };
        let line = src.split_to(newline_at + 1);
        let mut bytes = strip_iac(&line[..newline_at]);
        while bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_iac() {
        // IAC WILL ECHO around a line.
        let input = [255, 251, 1, b'h', b'i', 255, 255];
        assert_eq!(strip_iac(&input), vec![b'h', b'i', 255]);
    }

    #[test]
    fn test_codec_lines() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"hello\r\nworld\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("world".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
