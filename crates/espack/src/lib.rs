//! # Espack
//!
//! The value codec spoken on the engine's stdio. Packet payloads are maps of
//! these values; the framing around them lives one layer up, in `esrpc`.
//!
//! ## Philosophy
//!
//! - **Closed Value Model**: Seven kinds of value and nothing else. Decode
//!   sites match exhaustively.
//! - **Strict Writer**: The [`Encoder`] knows which container is open and what
//!   it expects next, so a map can never be written with a missing key or a
//!   missing value. Item counts are patched in when a container closes.
//! - **Borrowing Reader**: The [`Decoder`] hands out `&str` and `&[u8]` views
//!   into the input and checks every length against what is actually there.
//! - **Ordered**: Maps keep insertion order, so decode-then-encode reproduces
//!   the input bytes.
//!
//! ## Layout
//!
//! | kind      | bytes                                   |
//! |-----------|-----------------------------------------|
//! | null      | `00`                                    |
//! | bool      | `01 b` with `b` in `{0, 1}`             |
//! | int       | `02 i32`                                |
//! | string    | `03 len:u32 utf8[len]`                  |
//! | bytes     | `04 len:u32 raw[len]`                   |
//! | array     | `05 n:u32 value*n`                      |
//! | map       | `06 n:u32 (klen:u32 key[klen] value)*n` |
//!
//! Every multi-byte number is little-endian.

mod value;


pub use value::Map;
pub use value::Value;

/// Most containers either side nests inside one another.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A kind byte outside `0x00..=0x06`.
    InvalidTag(u8),
    InvalidBool(u8),
    /// A string or map key that is not UTF-8.
    InvalidUtf8,
    /// The input ended inside a value, or a length points past the input.
    UnexpectedEnd,
    /// A length or item count that does not fit in a `u32`.
    TooLong(usize),
    /// The next value is of another kind than the one asked for.
    WrongTag { expected: Tag, found: Tag },
    /// `array_end` while a map is open, or the reverse.
    UnbalancedEnd { expected: Container, open: Container },
    /// A container end with no container open.
    NothingOpen,
    /// Output requested while containers are still open.
    Unclosed(usize),
    /// A map value with no key before it, or a key outside a map.
    KeyOutOfPlace,
    /// A map closed right after a key.
    MissingValue,
    /// Nesting beyond [`MAX_DEPTH`].
    TooDeep,
    /// Input left over after a complete value.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTag(b) => write!(f, "unknown value kind {:#04x}", b),
            Self::InvalidBool(b) => write!(f, "bool byte {:#04x} is neither 0 nor 1", b),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::UnexpectedEnd => write!(f, "input ends in the middle of a value"),
            Self::TooLong(n) => write!(f, "length {} does not fit in 32 bits", n),
            Self::WrongTag { expected, found } => write!(f, "expected {:?}, found {:?}", expected, found),
            Self::UnbalancedEnd { expected, open } => {
                write!(f, "cannot end {:?} while {:?} is open", expected, open)
            }
            Self::NothingOpen => write!(f, "no container to end"),
            Self::Unclosed(n) => write!(f, "{} container(s) still open", n),
            Self::KeyOutOfPlace => write!(f, "map entries must be a key followed by a value"),
            Self::MissingValue => write!(f, "map ended after a key"),
            Self::TooDeep => write!(f, "nesting deeper than {}", MAX_DEPTH),
            Self::TrailingBytes(n) => write!(f, "{} bytes after the value", n),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The first byte of every encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0x00,
    Bool = 0x01,
    Int = 0x02,
    String = 0x03,
    Bytes = 0x04,
    Array = 0x05,
    Map = 0x06,
}

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        const ALL: [Tag; 7] = [Tag::Null, Tag::Bool, Tag::Int, Tag::String, Tag::Bytes, Tag::Array, Tag::Map];
        ALL.get(b as usize).copied()
    }

    pub fn is_container(self) -> bool {
        matches!(self, Tag::Array | Tag::Map)
    }
}

/// What the [`Encoder`] is currently writing into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Outside any container; any number of values may follow each other.
    Top,
    Array,
    Map,
}

struct Open {
    container: Container,
    /// Where the `u32` item count goes once the container ends.
    count_at: usize,
    items: usize,
    key_pending: bool,
}

/// Writes values one piece at a time.
///
/// Containers are opened and closed explicitly; inside a map, every value
/// must follow a [`Encoder::key`].
pub struct Encoder {
    out: Vec<u8>,
    open: Vec<Open>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_prefix(&[])
    }

    /// Starts the output with `prefix`, for headers the caller fills in later.
    pub fn with_prefix(prefix: &[u8]) -> Self {
        let mut out = Vec::with_capacity(prefix.len() + 256);
        out.extend_from_slice(prefix);
        let top = Open { container: Container::Top, count_at: 0, items: 0, key_pending: false };
        Self { out, open: vec![top] }
    }

    /// The finished output.
    ///
    /// # Errors
    /// `Unclosed` if a container was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.check_closed()?;
        Ok(self.out)
    }

    /// # Errors
    /// `Unclosed` if a container is still open.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.check_closed()?;
        Ok(&self.out)
    }

    fn check_closed(&self) -> Result<()> {
        match self.open.len() {
            1 => Ok(()),
            n => Err(Error::Unclosed(n - 1)),
        }
    }

    fn innermost(&mut self) -> &mut Open {
        let last = self.open.len() - 1;
        &mut self.open[last]
    }

    /// Writes the kind byte of a value, provided a value may go here.
    fn start_value(&mut self, tag: Tag) -> Result<()> {
        let open = self.innermost();
        if open.container == Container::Map && !open.key_pending {
            return Err(Error::KeyOutOfPlace);
        }
        self.out.push(tag as u8);
        Ok(())
    }

    fn end_value(&mut self) {
        let open = self.innermost();
        open.items += 1;
        open.key_pending = false;
    }

    fn put_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::TooLong(len))?;
        self.out.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        u32::try_from(data.len()).map_err(|_| Error::TooLong(data.len()))?;
        self.start_value(tag)?;
        self.put_len(data.len())?;
        self.out.extend_from_slice(data);
        self.end_value();
        Ok(())
    }

    fn begin(&mut self, tag: Tag, container: Container) -> Result<()> {
        if self.open.len() > MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        self.start_value(tag)?;
        let count_at = self.out.len();
        self.out.extend_from_slice(&0u32.to_le_bytes());
        self.open.push(Open { container, count_at, items: 0, key_pending: false });
        Ok(())
    }

    fn end(&mut self, expected: Container) -> Result<()> {
        if self.open.len() == 1 {
            return Err(Error::NothingOpen);
        }
        let open = self.innermost();
        if open.container != expected {
            return Err(Error::UnbalancedEnd { expected, open: open.container });
        }
        if open.key_pending {
            return Err(Error::MissingValue);
        }

        let Some(done) = self.open.pop() else {
            return Err(Error::NothingOpen);
        };
        let count = u32::try_from(done.items).map_err(|_| Error::TooLong(done.items))?;
        self.out[done.count_at..done.count_at + 4].copy_from_slice(&count.to_le_bytes());
        self.end_value();
        Ok(())
    }

    pub fn null(&mut self) -> Result<()> {
        self.start_value(Tag::Null)?;
        self.end_value();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.start_value(Tag::Bool)?;
        self.out.push(u8::from(v));
        self.end_value();
        Ok(())
    }

    pub fn int(&mut self, v: i32) -> Result<()> {
        self.start_value(Tag::Int)?;
        self.out.extend_from_slice(&v.to_le_bytes());
        self.end_value();
        Ok(())
    }

    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::String, v.as_bytes())
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    pub fn array_begin(&mut self) -> Result<()> {
        self.begin(Tag::Array, Container::Array)
    }

    pub fn array_end(&mut self) -> Result<()> {
        self.end(Container::Array)
    }

    /// Opens a map. Entries are written as `key(..)` then one value.
    pub fn map_begin(&mut self) -> Result<()> {
        self.begin(Tag::Map, Container::Map)
    }

    pub fn map_end(&mut self) -> Result<()> {
        self.end(Container::Map)
    }

    pub fn key(&mut self, name: &str) -> Result<()> {
        let open = self.innermost();
        if open.container != Container::Map || open.key_pending {
            return Err(Error::KeyOutOfPlace);
        }
        self.put_len(name.len())?;
        self.out.extend_from_slice(name.as_bytes());
        self.innermost().key_pending = true;
        Ok(())
    }

    pub fn value(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Null => self.null(),
            Value::Bool(b) => self.bool(*b),
            Value::Int(i) => self.int(*i),
            Value::String(s) => self.str(s),
            Value::Bytes(b) => self.bytes(b),
            Value::Array(items) => {
                self.array_begin()?;
                items.iter().try_for_each(|item| self.value(item))?;
                self.array_end()
            }
            Value::Map(map) => self.map(map),
        }
    }

    /// Writes `map` entry by entry, in order.
    pub fn map(&mut self, map: &Map) -> Result<()> {
        self.map_begin()?;
        for (key, value) in map.iter() {
            self.key(key)?;
            self.value(value)?;
        }
        self.map_end()
    }
}

/// Reads values out of a borrowed buffer.
///
/// Strings and byte blobs come back as views into the input. Containers come
/// back as iterators whose items are decoders of their own, confined to the
/// bytes of that item.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0, depth: 0 }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    /// Fails with `TrailingBytes` unless everything was read.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// The kind of the next value, without reading it.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.input.get(self.pos).ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEnd)?;
        let slice = self.input.get(self.pos..end).ok_or(Error::UnexpectedEnd)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn take_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.take_u32()? as usize;
        self.take(len)
    }

    fn take_text(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.take_blob()?).map_err(|_| Error::InvalidUtf8)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::WrongTag { expected, found });
        }
        self.pos += 1;
        Ok(())
    }

    /// Steps over the next value, containers included.
    pub fn skip(&mut self) -> Result<()> {
        self.skip_nested(self.depth)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag.is_container() && depth >= MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        self.pos += 1;
        match tag {
            Tag::Null => {}
            Tag::Bool => {
                self.take(1)?;
            }
            Tag::Int => {
                self.take(4)?;
            }
            Tag::String | Tag::Bytes => {
                self.take_blob()?;
            }
            Tag::Array | Tag::Map => {
                let entries = self.take_u32()?;
                for _ in 0..entries {
                    if tag == Tag::Map {
                        self.take_blob()?;
                    }
                    self.skip_nested(depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// Carves the next value out as a decoder over just its bytes.
    fn split_value(&mut self, depth: usize) -> Result<Decoder<'a>> {
        let start = self.pos;
        self.skip_nested(depth)?;
        Ok(Decoder { input: &self.input[start..self.pos], pos: 0, depth })
    }

    fn container(&mut self, tag: Tag) -> Result<(Decoder<'a>, u32)> {
        let found = self.peek_tag()?;
        if found != tag {
            return Err(Error::WrongTag { expected: tag, found });
        }
        let mut body = self.split_value(self.depth)?;
        body.pos = 1;
        let entries = body.take_u32()?;
        Ok((body, entries))
    }

    pub fn null(&mut self) -> Result<()> {
        self.expect(Tag::Null)
    }

    /// Reads a `null` if one is next and reports whether it did.
    pub fn take_null(&mut self) -> Result<bool> {
        let is_null = self.peek_tag()? == Tag::Null;
        if is_null {
            self.pos += 1;
        }
        Ok(is_null)
    }

    pub fn bool(&mut self) -> Result<bool> {
        self.expect(Tag::Bool)?;
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    pub fn int(&mut self) -> Result<i32> {
        self.expect(Tag::Int)?;
        Ok(self.take_u32()? as i32)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String)?;
        self.take_text()
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        self.take_blob()
    }

    pub fn array(&mut self) -> Result<ArrayIter<'a>> {
        let (body, remaining) = self.container(Tag::Array)?;
        Ok(ArrayIter { body, remaining })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        let (body, remaining) = self.container(Tag::Map)?;
        Ok(MapIter { body, remaining })
    }

    /// Reads the next value into an owned tree.
    pub fn value(&mut self) -> Result<Value> {
        self.value_nested(self.depth)
    }

    fn value_nested(&mut self, depth: usize) -> Result<Value> {
        let tag = self.peek_tag()?;
        if tag.is_container() && depth >= MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        let value = match tag {
            Tag::Null => {
                self.null()?;
                Value::Null
            }
            Tag::Bool => Value::Bool(self.bool()?),
            Tag::Int => Value::Int(self.int()?),
            Tag::String => Value::String(self.str()?.to_owned()),
            Tag::Bytes => Value::Bytes(self.bytes()?.to_vec()),
            Tag::Array => {
                self.pos += 1;
                let n = self.take_u32()? as usize;
                // Never reserve more slots than there are bytes left to fill them.
                let mut items = Vec::with_capacity(n.min(self.remaining()));
                for _ in 0..n {
                    items.push(self.value_nested(depth + 1)?);
                }
                Value::Array(items)
            }
            Tag::Map => {
                self.pos += 1;
                let n = self.take_u32()? as usize;
                let mut map = Map::with_capacity(n.min(self.remaining() / 5));
                for _ in 0..n {
                    let key = self.take_text()?.to_owned();
                    map.push(key, self.value_nested(depth + 1)?);
                }
                Value::Map(map)
            }
        };
        Ok(value)
    }
}

/// The items of an array, each as its own [`Decoder`].
#[derive(Debug)]
pub struct ArrayIter<'a> {
    body: Decoder<'a>,
    remaining: u32,
}

impl<'a> ArrayIter<'a> {
    /// Items not yet visited.
    pub fn len(&self) -> usize {
        self.remaining as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let depth = self.body.depth + 1;
        self.body.split_value(depth).map(Some)
    }
}

/// The entries of a map, in encoded order.
#[derive(Debug)]
pub struct MapIter<'a> {
    body: Decoder<'a>,
    remaining: u32,
}

impl<'a> MapIter<'a> {
    /// Entries not yet visited.
    pub fn len(&self) -> usize {
        self.remaining as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let key = self.body.take_text()?;
        let depth = self.body.depth + 1;
        Ok(Some((key, self.body.split_value(depth)?)))
    }
}
