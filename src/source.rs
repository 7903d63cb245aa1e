//! Input forms a compilation unit can be added from.
//!
//! Every form is decoded to a `String` inside the unit's parse+define task,
//! so slow reads never block the caller of `add_compilation_unit`.

use anyhow::{Context, Result, bail};
use std::fmt;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// Supported text encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "us-ascii" | "ascii" => Ok(Encoding::Ascii),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Encoding::Latin1),
            _ => bail!(
                "Unsupported encoding '{}'. Valid values: UTF-8, US-ASCII, ISO-8859-1",
                s
            ),
        }
    }
}

impl Encoding {
    pub fn decode(self, bytes: Vec<u8>) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes).context("Source is not valid UTF-8"),
            Encoding::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    bail!("Source is not valid US-ASCII: non-ASCII byte at offset {}", pos);
                }
                // All bytes are ASCII, hence valid UTF-8.
                String::from_utf8(bytes).context("Source is not valid US-ASCII")
            }
            Encoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}

/// Source of one compilation unit.
pub enum SourceInput {
    Text(String),
    /// The first `len` characters of `chars`.
    Chars { chars: Vec<char>, len: usize },
    Reader {
        reader: Box<dyn Read + Send>,
        /// Expected size in bytes, used to pre-size the buffer.
        size: Option<usize>,
        buffer_size: Option<usize>,
        encoding: Option<String>,
    },
    File {
        path: PathBuf,
        encoding: Option<String>,
    },
}

impl SourceInput {
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        SourceInput::Reader {
            reader: Box::new(reader),
            size: None,
            buffer_size: None,
            encoding: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        SourceInput::File {
            path: path.into(),
            encoding: None,
        }
    }

    pub fn chars(chars: Vec<char>, len: usize) -> Self {
        SourceInput::Chars { chars, len }
    }

    /// Set the encoding of a reader or file source. No-op for in-memory text.
    pub fn with_encoding(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            SourceInput::Reader { encoding, .. } | SourceInput::File { encoding, .. } => {
                *encoding = Some(name.into());
            }
            SourceInput::Text(_) | SourceInput::Chars { .. } => {}
        }
        self
    }

    pub fn with_size(mut self, expected: usize) -> Self {
        if let SourceInput::Reader { size, .. } = &mut self {
            *size = Some(expected);
        }
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        if let SourceInput::Reader { buffer_size, .. } = &mut self {
            *buffer_size = Some(bytes);
        }
        self
    }

    /// Read and decode the source.
    pub fn read_to_string(self) -> Result<String> {
        match self {
            SourceInput::Text(text) => Ok(text),
            SourceInput::Chars { chars, len } => {
                if len > chars.len() {
                    bail!(
                        "Character count {} exceeds buffer length {}",
                        len,
                        chars.len()
                    );
                }
                Ok(chars[..len].iter().collect())
            }
            SourceInput::Reader {
                reader,
                size,
                buffer_size,
                encoding,
            } => {
                let encoding = parse_encoding(encoding.as_deref())?;
                let capacity = buffer_size.unwrap_or(DEFAULT_READ_BUFFER).max(1);
                let mut reader = BufReader::with_capacity(capacity, reader);
                let mut bytes = Vec::with_capacity(size.unwrap_or(0));
                reader
                    .read_to_end(&mut bytes)
                    .context("Failed to read source stream")?;
                encoding.decode(bytes)
            }
            SourceInput::File { path, encoding } => {
                let encoding = parse_encoding(encoding.as_deref())?;
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read source file: {}", path.display()))?;
                encoding.decode(bytes)
            }
        }
    }
}

fn parse_encoding(name: Option<&str>) -> Result<Encoding> {
    name.map(Encoding::from_str)
        .transpose()
        .map(Option::unwrap_or_default)
}

impl fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceInput::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            SourceInput::Chars { len, .. } => f.debug_struct("Chars").field("len", len).finish(),
            SourceInput::Reader { size, encoding, .. } => f
                .debug_struct("Reader")
                .field("size", size)
                .field("encoding", encoding)
                .finish(),
            SourceInput::File { path, encoding } => f
                .debug_struct("File")
                .field("path", path)
                .field("encoding", encoding)
                .finish(),
        }
    }
}

impl From<&str> for SourceInput {
    fn from(text: &str) -> Self {
        SourceInput::Text(text.to_string())
    }
}

impl From<String> for SourceInput {
    fn from(text: String) -> Self {
        SourceInput::Text(text)
    }
}
