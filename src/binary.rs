use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::borrow::Cow;
use std::{fmt, io};

/// The 'glTF' magic, little-endian.
pub const MAGIC: u32 = 0x4654_6C67;

/// The 'JSON' chunk type.
pub const CHUNK_JSON: u32 = 0x4E4F_534A;

/// The 'BIN\0' chunk type.
pub const CHUNK_BIN: u32 = 0x004E_4942;

/// Represents a GLB loader error.
#[derive(Debug)]
pub enum Error {
    /// Io error occured.
    Io(io::Error),
    /// Unsupported version.
    Version(u32),
    /// Magic says that file is not binary glTF.
    Magic([u8; 4]),
    /// File is too small to contain the header and a JSON chunk.
    FileTooSmall {
        /// Actual byte length.
        length: usize,
        /// Minimum byte length of a valid GLB.
        length_min: usize,
    },
    /// Length specified in GLB header exceeds that of the data.
    Length {
        /// Length specified in GLB header.
        length: u32,
        /// Actual length of data read.
        length_read: usize,
    },
    /// Declared chunk length runs past the end of the file.
    ChunkLength {
        /// Zero-based chunk index.
        index: usize,
        /// Declared chunkLength.
        length: u32,
        /// Bytes remaining in the file.
        remain: usize,
    },
    /// The first chunk was not a JSON chunk, or no JSON chunk exists.
    MissingJsonChunk,
}

/// Non-fatal observations made while walking the chunk list.
///
/// Reported by the caller as warnings/informationals rather than failing
/// the load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkNote {
    /// A JSON chunk appeared after the first chunk and was discarded.
    ExtraJson {
        /// Zero-based chunk index.
        index: usize,
    },
    /// A chunk of unrecognized type was skipped.
    Unknown {
        /// Zero-based chunk index.
        index: usize,
        /// The raw chunk type value.
        type_: u32,
    },
}

/// Binary glTF contents.
///
/// BIN chunks back, in order, the buffers whose URI is absent.
#[derive(Clone, Debug)]
pub struct Glb<'a> {
    /// The header section of the `.glb` file.
    pub header: Header,
    /// The JSON section of the `.glb` file.
    pub json: Cow<'a, [u8]>,
    /// The BIN sections of the `.glb` file, in order of appearance.
    pub bin: Vec<Cow<'a, [u8]>>,
    /// Non-fatal chunk observations for the caller to report.
    pub notes: Vec<ChunkNote>,
}

/// The header section of a .glb file.
#[derive(Copy, Clone, Debug)]
pub struct Header {
    /// Must be `b"glTF"`.
    pub magic: [u8; 4],
    /// Must be `2`.
    pub version: u32,
    /// Must match the length of the parent .glb file.
    pub length: u32,
}

impl Header {
    fn from_reader<R: io::Read>(mut reader: R) -> Result<Self, Error> {
        use self::Error::Io;
        let mut magic = [0; 4];
        reader.read_exact(&mut magic).map_err(Io)?;
        if &magic == b"glTF" {
            Ok(Self {
                magic,
                version: reader.read_u32::<LittleEndian>().map_err(Io)?,
                length: reader.read_u32::<LittleEndian>().map_err(Io)?,
            })
        } else {
            Err(Error::Magic(magic))
        }
    }

    /// Encoded size of the file header, in bytes.
    pub const fn size_of() -> usize {
        12
    }
}

#[derive(Copy, Clone, Debug)]
struct ChunkHeader {
    length: u32,
    type_: u32,
}

impl ChunkHeader {
    fn from_slice(data: &mut &[u8]) -> Result<Self, Error> {
        use self::Error::Io;
        let length = data.read_u32::<LittleEndian>().map_err(Io)?;
        let type_ = data.read_u32::<LittleEndian>().map_err(Io)?;
        Ok(Self { length, type_ })
    }

    const fn size_of() -> usize {
        8
    }
}

fn align_to_multiple_of_four(n: &mut usize) {
    *n = (*n + 3) & !3;
}

fn split_chunks(mut data: &[u8]) -> Result<(&[u8], Vec<&[u8]>, Vec<ChunkNote>), Error> {
    let mut json: Option<&[u8]> = None;
    let mut bin = Vec::new();
    let mut notes = Vec::new();
    let mut index = 0;
    while !data.is_empty() {
        if data.len() < ChunkHeader::size_of() {
            // Trailing padding shorter than a chunk header.
            break;
        }
        let header = ChunkHeader::from_slice(&mut data)?;
        if header.length as usize > data.len() {
            return Err(Error::ChunkLength {
                index,
                length: header.length,
                remain: data.len(),
            });
        }
        let (payload, rest) = data.split_at(header.length as usize);
        data = rest;
        match header.type_ {
            CHUNK_JSON => {
                if index == 0 {
                    json = Some(payload);
                } else {
                    // The format mandates exactly one JSON chunk, first.
                    notes.push(ChunkNote::ExtraJson { index });
                }
            }
            CHUNK_BIN => bin.push(payload),
            type_ => notes.push(ChunkNote::Unknown { index, type_ }),
        }
        index += 1;
    }
    match json {
        Some(json) => Ok((json, bin, notes)),
        None => Err(Error::MissingJsonChunk),
    }
}

impl<'a> Glb<'a> {
    /// Splits loaded GLB into its chunks.
    ///
    /// * Mandatory GLB header.
    /// * Mandatory JSON chunk, first.
    /// * Zero or more BIN chunks.
    /// * Unknown chunks are skipped and noted.
    pub fn from_slice(mut data: &'a [u8]) -> Result<Self, crate::Error> {
        let whole_len = data.len();
        if whole_len < Header::size_of() + ChunkHeader::size_of() {
            return Err(crate::Error::Binary(Error::FileTooSmall {
                length: whole_len,
                length_min: Header::size_of() + ChunkHeader::size_of(),
            }));
        }
        let header = Header::from_reader(&mut data)
            .and_then(|header| {
                let contents_length = header.length as usize - Header::size_of();
                if contents_length <= data.len() {
                    Ok(header)
                } else {
                    Err(Error::Length {
                        length: contents_length as u32,
                        length_read: data.len(),
                    })
                }
            })
            .map_err(crate::Error::Binary)?;
        match header.version {
            2 => {
                let contents_length = header.length as usize - Header::size_of();
                let (json, bin, notes) =
                    split_chunks(&data[..contents_length]).map_err(crate::Error::Binary)?;
                Ok(Glb {
                    header,
                    json: json.into(),
                    bin: bin.into_iter().map(Into::into).collect(),
                    notes,
                })
            }
            x => Err(crate::Error::Binary(Error::Version(x))),
        }
    }

    /// Reads binary glTF from a generic stream of data.
    pub fn from_reader<R: io::Read>(mut reader: R) -> Result<Glb<'static>, crate::Error> {
        let header = Header::from_reader(&mut reader).map_err(crate::Error::Binary)?;
        match header.version {
            2 => {
                let glb_len = header.length as usize - Header::size_of();
                let mut buf = vec![0; glb_len];
                if let Err(e) = reader.read_exact(&mut buf).map_err(Error::Io) {
                    return Err(crate::Error::Binary(e));
                }
                let (json, bin, notes) = split_chunks(&buf).map_err(crate::Error::Binary)?;
                Ok(Glb {
                    header,
                    json: json.to_vec().into(),
                    bin: bin.iter().map(|b| Cow::from(b.to_vec())).collect(),
                    notes,
                })
            }
            x => Err(crate::Error::Binary(Error::Version(x))),
        }
    }

    /// Writes binary glTF to a writer.
    pub fn to_writer<W>(&self, mut writer: W) -> Result<(), crate::Error>
    where
        W: io::Write,
    {
        // File header.
        {
            let mut length = Header::size_of() + ChunkHeader::size_of() + self.json.len();
            align_to_multiple_of_four(&mut length);
            for bin in &self.bin {
                length += ChunkHeader::size_of() + bin.len();
                align_to_multiple_of_four(&mut length);
            }
            writer.write_all(b"glTF").map_err(Error::Io)?;
            writer.write_u32::<LittleEndian>(2).map_err(Error::Io)?;
            writer
                .write_u32::<LittleEndian>(length as u32)
                .map_err(Error::Io)?;
        }

        // JSON chunk, padded with spaces.
        {
            let mut length = self.json.len();
            align_to_multiple_of_four(&mut length);
            let padding = length - self.json.len();
            writer
                .write_u32::<LittleEndian>(length as u32)
                .map_err(Error::Io)?;
            writer
                .write_u32::<LittleEndian>(CHUNK_JSON)
                .map_err(Error::Io)?;
            writer.write_all(&self.json).map_err(Error::Io)?;
            for _ in 0..padding {
                writer.write_u8(0x20).map_err(Error::Io)?;
            }
        }

        // BIN chunks, zero padded.
        for bin in &self.bin {
            let mut length = bin.len();
            align_to_multiple_of_four(&mut length);
            let padding = length - bin.len();
            writer
                .write_u32::<LittleEndian>(length as u32)
                .map_err(Error::Io)?;
            writer
                .write_u32::<LittleEndian>(CHUNK_BIN)
                .map_err(Error::Io)?;
            writer.write_all(bin).map_err(Error::Io)?;
            for _ in 0..padding {
                writer.write_u8(0).map_err(Error::Io)?;
            }
        }

        Ok(())
    }

    /// Writes binary glTF to a byte vector.
    pub fn to_vec(&self) -> Result<Vec<u8>, crate::Error> {
        let mut vec = Vec::new();
        self.to_writer(&mut vec)?;
        Ok(vec)
    }
}

impl From<Error> for crate::Error {
    fn from(err: Error) -> Self {
        crate::Error::Binary(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => e.fmt(f),
            Error::Version(version) => write!(f, "unsupported GLB version {}", version),
            Error::Magic(_) => f.write_str("not glTF magic"),
            Error::FileTooSmall { length, length_min } => write!(
                f,
                "file too small to be binary glTF ({} < {} bytes)",
                length, length_min
            ),
            Error::Length {
                length,
                length_read,
            } => write!(
                f,
                "header length {} exceeds available data {}",
                length, length_read
            ),
            Error::ChunkLength {
                index,
                length,
                remain,
            } => write!(
                f,
                "chunk {} length {} exceeds remaining {} bytes",
                index, length, remain
            ),
            Error::MissingJsonChunk => f.write_str("first chunk is not JSON"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(type_: u32, payload: &[u8]) -> Vec<u8> {
        let mut padded = payload.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(if type_ == CHUNK_JSON { 0x20 } else { 0 });
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(padded.len() as u32).to_le_bytes());
        out.extend_from_slice(&type_.to_le_bytes());
        out.extend_from_slice(&padded);
        out
    }

    fn glb_bytes(chunks: &[Vec<u8>]) -> Vec<u8> {
        let contents: usize = chunks.iter().map(Vec::len).sum();
        let mut out = Vec::new();
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&((12 + contents) as u32).to_le_bytes());
        for c in chunks {
            out.extend_from_slice(c);
        }
        out
    }

    #[test]
    fn splits_json_and_bin() {
        let json = br#"{"asset":{"version":"2.0"}}"#;
        let bin = [1u8, 2, 3, 4];
        let data = glb_bytes(&[chunk(CHUNK_JSON, json), chunk(CHUNK_BIN, &bin)]);
        let glb = Glb::from_slice(&data).unwrap();
        assert!(glb.json.starts_with(b"{\"asset\""));
        assert_eq!(glb.bin.len(), 1);
        assert_eq!(&glb.bin[0][..], &bin);
        assert!(glb.notes.is_empty());
    }

    #[test]
    fn rejects_non_json_first_chunk() {
        let data = glb_bytes(&[chunk(CHUNK_BIN, &[0; 4])]);
        match Glb::from_slice(&data) {
            Err(crate::Error::Binary(Error::MissingJsonChunk)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn notes_extra_json_chunk() {
        let json = br#"{}"#;
        let data = glb_bytes(&[chunk(CHUNK_JSON, json), chunk(CHUNK_JSON, json)]);
        let glb = Glb::from_slice(&data).unwrap();
        assert_eq!(glb.notes, vec![ChunkNote::ExtraJson { index: 1 }]);
    }

    #[test]
    fn notes_unknown_chunk() {
        let json = br#"{}"#;
        let data = glb_bytes(&[chunk(CHUNK_JSON, json), chunk(0xDEAD_BEEF, &[0; 8])]);
        let glb = Glb::from_slice(&data).unwrap();
        assert_eq!(
            glb.notes,
            vec![ChunkNote::Unknown {
                index: 1,
                type_: 0xDEAD_BEEF
            }]
        );
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = glb_bytes(&[chunk(CHUNK_JSON, b"{}")]);
        data[4] = 1;
        assert!(Glb::from_slice(&data).is_err());
    }

    #[test]
    fn rejects_oversized_chunk() {
        let json = br#"{}  "#;
        let mut raw = Vec::new();
        raw.extend_from_slice(&(64u32).to_le_bytes());
        raw.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        raw.extend_from_slice(json);
        let data = glb_bytes(&[raw]);
        assert!(Glb::from_slice(&data).is_err());
    }

    #[test]
    fn writer_round_trips() {
        let json = br#"{"asset":{"version":"2.0"}}"#.to_vec();
        let bin = vec![9u8, 8, 7];
        let glb = Glb {
            header: Header {
                magic: *b"glTF",
                version: 2,
                length: 0,
            },
            json: json.clone().into(),
            bin: vec![bin.clone().into()],
            notes: Vec::new(),
        };
        let bytes = glb.to_vec().unwrap();
        let back = Glb::from_slice(&bytes).unwrap();
        // JSON is space padded to four bytes, which serde tolerates.
        assert!(back.json.starts_with(&json[..]));
        assert!(back.bin[0].starts_with(&bin[..]));
        assert_eq!(back.header.length as usize, bytes.len());
    }
}
