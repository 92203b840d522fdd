use crate::{
    error::Error,
    schema::{EncodingErrors, TextEncoding},
};

pub(crate) fn decode(
    raw: &[u8],
    encoding: TextEncoding,
    errors: EncodingErrors,
) -> Result<String, Error> {
    match encoding {
        TextEncoding::Utf8 => match errors {
            EncodingErrors::Strict => {
                String::from_utf8(raw.to_vec()).map_err(|_| decode_err(encoding))
            }
            EncodingErrors::Replace => Ok(String::from_utf8_lossy(raw).into_owned()),
            EncodingErrors::Ignore => Ok(String::from_utf8_lossy(raw)
                .chars()
                .filter(|c| *c != char::REPLACEMENT_CHARACTER)
                .collect()),
        },
        TextEncoding::Ascii => {
            let mut out = String::with_capacity(raw.len());
            for &b in raw {
                if b < 0x80 {
                    out.push(b as char);
                } else {
                    match errors {
                        EncodingErrors::Strict => return Err(decode_err(encoding)),
                        EncodingErrors::Replace => out.push(char::REPLACEMENT_CHARACTER),
                        EncodingErrors::Ignore => {}
                    }
                }
            }
            Ok(out)
        }
        // Every byte is a valid Latin-1 code point.
        TextEncoding::Latin1 => Ok(raw.iter().map(|&b| b as char).collect()),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if raw.len() % 2 != 0 && matches!(errors, EncodingErrors::Strict) {
                return Err(decode_err(encoding));
            }
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| match encoding {
                    TextEncoding::Utf16Le => u16::from_le_bytes([c[0], c[1]]),
                    _ => u16::from_be_bytes([c[0], c[1]]),
                })
                .collect();
            match errors {
                EncodingErrors::Strict => {
                    String::from_utf16(&units).map_err(|_| decode_err(encoding))
                }
                EncodingErrors::Replace => Ok(String::from_utf16_lossy(&units)),
                EncodingErrors::Ignore => Ok(char::decode_utf16(units.iter().copied())
                    .filter_map(|r| r.ok())
                    .collect()),
            }
        }
    }
}

pub(crate) fn encode(
    s: &str,
    encoding: TextEncoding,
    errors: EncodingErrors,
) -> Result<Vec<u8>, Error> {
    match encoding {
        TextEncoding::Utf8 => Ok(s.as_bytes().to_vec()),
        TextEncoding::Ascii | TextEncoding::Latin1 => {
            let limit = if matches!(encoding, TextEncoding::Ascii) {
                0x80
            } else {
                0x100
            };
            let mut out = Vec::with_capacity(s.len());
            for c in s.chars() {
                let cp = c as u32;
                if cp < limit {
                    out.push(cp as u8);
                } else {
                    match errors {
                        EncodingErrors::Strict => return Err(encode_err(encoding)),
                        EncodingErrors::Replace => out.push(b'?'),
                        EncodingErrors::Ignore => {}
                    }
                }
            }
            Ok(out)
        }
        TextEncoding::Utf16Le => Ok(s.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        TextEncoding::Utf16Be => Ok(s.encode_utf16().flat_map(u16::to_be_bytes).collect()),
    }
}

fn decode_err(encoding: TextEncoding) -> Error {
    Error::Encoding {
        action: "decode",
        encoding: encoding.to_string(),
    }
}

fn encode_err(encoding: TextEncoding) -> Error {
    Error::Encoding {
        action: "encode",
        encoding: encoding.to_string(),
    }
}
