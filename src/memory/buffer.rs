use crate::error::{Error, Result};
use crate::memory::arena::{QueryArena, Span};

/// Growable byte buffer backed by arena spans.
///
/// Old storage is abandoned on growth; the arena reclaims it in bulk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrBuf {
    storage: Option<Span>,
    len: usize,
}

impl StrBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.map_or(0, |span| span.len())
    }

    pub fn append(&mut self, arena: &mut QueryArena, data: &[u8]) -> Result<()> {
        let need = self.len + data.len();
        if need >= self.capacity() {
            let grown = arena.alloc(need * 2 + 1)?;
            if let Some(old) = self.storage {
                arena.copy(old.slice(0, self.len), grown)?;
            }
            self.storage = Some(grown);
        }

        if let Some(storage) = self.storage {
            arena.write(storage.slice(self.len, data.len()), data)?;
        }
        self.len = need;
        Ok(())
    }

    /// NUL-terminates the contents and returns the span of the text, NUL excluded.
    pub fn to_cstring(&mut self, arena: &mut QueryArena) -> Result<Span> {
        if self.storage.is_none() {
            self.append(arena, &[])?;
        }
        let storage = self.storage.ok_or(Error::DanglingSpan)?;
        arena.write(storage.slice(self.len, 1), &[0])?;
        Ok(storage.slice(0, self.len))
    }

    pub fn as_bytes<'a>(&self, arena: &'a QueryArena) -> Result<&'a [u8]> {
        match self.storage {
            Some(storage) => arena.bytes(storage.slice(0, self.len)),
            None => Ok(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::arena::ArenaConfig;

    fn arena() -> QueryArena {
        let mut arena = QueryArena::new(ArenaConfig {
            page_size: 1024,
            static_pages: 2,
            max_mem: 1 << 16,
            max_pages: 16,
        })
        .unwrap();
        arena.init().unwrap();
        arena
    }

    #[test]
    fn test_append_grows_by_doubling() {
        let mut arena = arena();
        let mut buf = StrBuf::new();

        buf.append(&mut arena, b"abc").unwrap();
        assert_eq!(buf.capacity(), 7);

        buf.append(&mut arena, b"defg").unwrap();
        assert_eq!(buf.len(), 7);
        assert_eq!(buf.capacity(), 15);
        assert_eq!(buf.as_bytes(&arena).unwrap(), b"abcdefg");
    }

    #[test]
    fn test_to_cstring_terminates() {
        let mut arena = arena();
        let mut buf = StrBuf::new();
        buf.append(&mut arena, b"VALUE").unwrap();

        let text = buf.to_cstring(&mut arena).unwrap();
        assert_eq!(arena.bytes(text).unwrap(), b"VALUE");
        let storage = buf.storage.unwrap();
        assert_eq!(arena.bytes(storage).unwrap()[5], 0);
    }

    #[test]
    fn test_empty_buffer_cstring() {
        let mut arena = arena();
        let mut buf = StrBuf::new();
        let text = buf.to_cstring(&mut arena).unwrap();
        assert!(text.is_empty());
        assert_eq!(buf.capacity(), 1);
    }
}
