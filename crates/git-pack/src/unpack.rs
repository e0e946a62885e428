//! Streaming pack unpacking.
//!
//! Unlike [`crate::pack::PackFile`], which mmaps a `.pack` file and resolves
//! objects through a prebuilt `.idx`, [`Unpacker`] walks an arbitrary
//! [`Read`] stream forward, object by object, discovering each entry's
//! compressed boundary incrementally. This is the shape a pack arrives in
//! over the wire, before any index exists for it.

use std::collections::HashMap;
use std::io::{self, Read};

use flate2::{Decompress, FlushDecompress, Status};
use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::ObjectType;

use crate::entry::{parse_entry_header, PackEntry};
use crate::{
    PackEntryType, PackError, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION,
};

/// Largest possible entry header: a 64-bit size varint (~10 bytes) plus
/// either an OFS_DELTA offset varint (~10 bytes) or a REF_DELTA OID (up to
/// 32 bytes for SHA-256). Comfortably bounded well under this.
const MAX_HEADER_LOOKAHEAD: usize = 64;

/// Chunk size used when pulling more bytes from the underlying reader.
const READ_CHUNK: usize = 8192;

/// A lookahead buffer over an arbitrary `Read`, tracking the absolute
/// stream offset of the first unconsumed byte.
struct StreamCursor<R> {
    reader: R,
    buf: Vec<u8>,
    pos: u64,
}

impl<R: Read> StreamCursor<R> {
    fn new(reader: R, start: u64) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            pos: start,
        }
    }

    /// Pull more bytes from the reader until `buf` holds at least `want`
    /// bytes or the stream is exhausted.
    fn fill(&mut self, want: usize) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.buf.len() < want {
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(0..n);
        self.pos += n as u64;
    }

    /// Read and consume exactly `n` bytes, or fail with an unexpected-EOF
    /// error if the stream runs out first.
    fn take(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.fill(n)?;
        if self.buf.len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated pack stream",
            ));
        }
        let out = self.buf[..n].to_vec();
        self.consume(n);
        Ok(out)
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// An object produced by [`Unpacker`], fully resolved against whatever
/// bases were available at the time it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedObject {
    pub oid: ObjectId,
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    /// Offset of this entry's header within the pack stream.
    pub offset: u64,
    /// CRC32 of the entry's raw (header + compressed) bytes.
    pub crc32: u32,
}

/// Sequential, forward-only reader over a packfile byte stream.
///
/// Objects are emitted in the order they appear in the stream. OFS_DELTA
/// bases are always resolvable from entries already walked, since a base
/// is structurally required to precede any entry that deltas against it.
/// REF_DELTA bases are looked up among already-resolved in-pack objects
/// first, then handed to an external resolver; if neither has it, the
/// entry fails with [`PackError::UnresolvedBase`].
pub struct Unpacker<R> {
    cursor: StreamCursor<R>,
    remaining: u32,
    total_objects: u32,
    resolver: Box<dyn Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>>,
    resolved_by_offset: HashMap<u64, (ObjectType, Vec<u8>)>,
    oid_to_offset: HashMap<ObjectId, u64>,
    content_hasher: Hasher,
    hash_algo: HashAlgorithm,
    done: bool,
}

impl<R: Read> Unpacker<R> {
    /// Open a pack stream with no external base resolver.
    pub fn new(reader: R) -> Result<Self, PackError> {
        Self::with_resolver(reader, |_| None)
    }

    /// Open a pack stream, resolving REF_DELTA bases this pack does not
    /// contain itself through `resolver`.
    pub fn with_resolver(
        mut reader: R,
        resolver: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)> + 'static,
    ) -> Result<Self, PackError> {
        let mut header = [0u8; PACK_HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|_| PackError::TruncatedHeader)?;
        if &header[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidSignature);
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let total_objects = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

        let hash_algo = HashAlgorithm::Sha1;
        let mut content_hasher = Hasher::new(hash_algo);
        content_hasher.update(&header);

        Ok(Self {
            cursor: StreamCursor::new(reader, PACK_HEADER_SIZE as u64),
            remaining: total_objects,
            total_objects,
            resolver: Box::new(resolver),
            resolved_by_offset: HashMap::new(),
            oid_to_offset: HashMap::new(),
            content_hasher,
            hash_algo,
            done: false,
        })
    }

    /// Total number of objects declared in the pack header.
    pub fn total_objects(&self) -> u32 {
        self.total_objects
    }

    /// Abort iteration early. Clears the resolved-object maps so large
    /// buffered object bodies are dropped instead of held for the
    /// lifetime of the `Unpacker`.
    pub fn abort(&mut self) {
        self.done = true;
        self.resolved_by_offset.clear();
        self.resolved_by_offset.shrink_to_fit();
        self.oid_to_offset.clear();
        self.oid_to_offset.shrink_to_fit();
    }

    /// After all objects have been consumed, verify and return the
    /// trailing pack checksum.
    pub fn finish(mut self) -> Result<ObjectId, PackError> {
        let hash_len = self.hash_algo.digest_len();
        let trailer = self
            .cursor
            .take(hash_len)
            .map_err(|_| PackError::TruncatedHeader)?;
        let stored = ObjectId::from_bytes(&trailer, self.hash_algo)?;
        let computed = self.content_hasher.finalize().map_err(PackError::Hash)?;
        if computed != stored {
            return Err(PackError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        Ok(computed)
    }

    fn read_header(&mut self) -> Result<(PackEntry, u64), PackError> {
        let entry_offset = self.cursor.position();
        self.cursor
            .fill(MAX_HEADER_LOOKAHEAD)
            .map_err(|_| PackError::CorruptEntry(entry_offset))?;
        let entry = parse_entry_header(&self.cursor.buf, entry_offset)?;
        let header_bytes = self
            .cursor
            .take(entry.header_size)
            .map_err(|_| PackError::CorruptEntry(entry_offset))?;
        self.content_hasher.update(&header_bytes);
        Ok((entry, entry_offset))
    }

    /// Decompress one entry's payload, returning the decompressed bytes
    /// and the entry's raw CRC32 (header bytes the caller already fed in
    /// plus every compressed byte consumed here).
    fn inflate_entry(
        &mut self,
        expected_size: usize,
        entry_offset: u64,
        mut crc: crc32fast::Hasher,
    ) -> Result<(Vec<u8>, u32), PackError> {
        let mut decompress = Decompress::new(true);
        let mut output = Vec::with_capacity(expected_size);

        loop {
            self.cursor
                .fill(READ_CHUNK)
                .map_err(|_| PackError::CorruptEntry(entry_offset))?;
            if self.cursor.buf.is_empty() {
                return Err(PackError::CorruptEntry(entry_offset));
            }

            let before_in = decompress.total_in();
            let before_out = decompress.total_out();
            let mut out_chunk = vec![0u8; READ_CHUNK];

            let status = decompress
                .decompress(&self.cursor.buf, &mut out_chunk, FlushDecompress::None)
                .map_err(|_| PackError::CorruptEntry(entry_offset))?;

            let in_consumed = (decompress.total_in() - before_in) as usize;
            let out_produced = (decompress.total_out() - before_out) as usize;
            output.extend_from_slice(&out_chunk[..out_produced]);

            let consumed_bytes = self.cursor.buf[..in_consumed].to_vec();
            crc.update(&consumed_bytes);
            self.content_hasher.update(&consumed_bytes);
            self.cursor.consume(in_consumed);

            if status == Status::StreamEnd {
                break;
            }
            if in_consumed == 0 && out_produced == 0 {
                return Err(PackError::CorruptEntry(entry_offset));
            }
        }

        if output.len() != expected_size {
            return Err(PackError::CorruptEntry(entry_offset));
        }

        Ok((output, crc.finalize()))
    }

    fn read_one(&mut self) -> Result<UnpackedObject, PackError> {
        let (entry, entry_offset) = self.read_header()?;
        let crc = crc32fast::Hasher::new();
        let (decompressed, crc32) =
            self.inflate_entry(entry.uncompressed_size, entry_offset, crc)?;

        let (obj_type, data) = match entry.entry_type {
            PackEntryType::Commit | PackEntryType::Tree | PackEntryType::Blob | PackEntryType::Tag => {
                let obj_type = entry.entry_type.to_object_type().expect("non-delta type");
                (obj_type, decompressed)
            }
            PackEntryType::OfsDelta { base_offset } => {
                let (base_type, base_data) = self
                    .resolved_by_offset
                    .get(&base_offset)
                    .cloned()
                    .ok_or(PackError::UnresolvedBase(entry_offset))?;
                let data = crate::delta::apply::apply_delta(&base_data, &decompressed)?;
                (base_type, data)
            }
            PackEntryType::RefDelta { base_oid } => {
                let in_pack = self
                    .oid_to_offset
                    .get(&base_oid)
                    .and_then(|offset| self.resolved_by_offset.get(offset).cloned());
                let (base_type, base_data) = match in_pack {
                    Some(base) => base,
                    None => (self.resolver)(&base_oid)
                        .ok_or(PackError::UnresolvedBase(entry_offset))?,
                };
                let data = crate::delta::apply::apply_delta(&base_data, &decompressed)?;
                (base_type, data)
            }
        };

        let oid = crate::write::hash_object_bytes(obj_type, &data)?;

        self.resolved_by_offset
            .insert(entry_offset, (obj_type, data.clone()));
        self.oid_to_offset.insert(oid, entry_offset);

        Ok(UnpackedObject {
            oid,
            obj_type,
            data,
            offset: entry_offset,
            crc32,
        })
    }
}

impl<R: Read> Iterator for Unpacker<R> {
    type Item = Result<UnpackedObject, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.read_one() {
            Ok(obj) => Some(Ok(obj)),
            Err(err) => {
                self.abort();
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::{create_pack, PackWriter};
    use git_object::ObjectType;
    use std::io::Cursor;

    fn pack_bytes(objects: &[(ObjectType, Vec<u8>)]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let (pack_path, _idx_path, _checksum) =
            create_pack(dir.path(), "test", objects).unwrap();
        std::fs::read(pack_path).unwrap()
    }

    #[test]
    fn unpacks_simple_objects_in_order() {
        let objects = vec![
            (ObjectType::Blob, b"hello world".to_vec()),
            (ObjectType::Blob, b"goodbye world".to_vec()),
        ];
        let bytes = pack_bytes(&objects);

        let unpacker = Unpacker::new(Cursor::new(bytes)).unwrap();
        assert_eq!(unpacker.total_objects(), 2);

        let results: Vec<UnpackedObject> = unpacker.map(|r| r.unwrap()).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data, b"hello world");
        assert_eq!(results[1].data, b"goodbye world");
    }

    #[test]
    fn resolves_ofs_delta_against_earlier_object() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("thin.pack");

        let mut writer = PackWriter::new(&pack_path).unwrap();
        let base = b"the quick brown fox jumps over the lazy dog".to_vec();
        let base_pos = writer.position();
        writer.add_object(ObjectType::Blob, &base).unwrap();

        // Build a delta that copies the whole base then appends text.
        let mut delta = Vec::new();
        delta.extend_from_slice(&crate::delta::write_varint(base.len()));
        delta.extend_from_slice(&crate::delta::write_varint(base.len() + 4));
        delta.extend_from_slice(&crate::delta::encode_copy(0, base.len()));
        delta.extend_from_slice(&crate::delta::encode_insert(b"!!!!"));

        let mut target = base.clone();
        target.extend_from_slice(b"!!!!");
        let target_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", &target).unwrap();
        writer.add_ofs_delta(base_pos, target_oid, &delta).unwrap();
        let (pack_path, _checksum) = writer.finish().unwrap();

        let bytes = std::fs::read(&pack_path).unwrap();
        let unpacker = Unpacker::new(Cursor::new(bytes)).unwrap();
        let results: Vec<UnpackedObject> = unpacker.map(|r| r.unwrap()).collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data, base);
        assert_eq!(results[1].data, target);
    }

    #[test]
    fn unresolved_ref_delta_without_resolver_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("thin.pack");

        let mut writer = PackWriter::new(&pack_path).unwrap();
        writer.set_thin(true);
        let missing_base = ObjectId::from_bytes(&[0xAB; 20], HashAlgorithm::Sha1).unwrap();
        let target_oid = Hasher::digest(HashAlgorithm::Sha1, b"target-placeholder").unwrap();
        let mut delta = Vec::new();
        delta.extend_from_slice(&crate::delta::write_varint(4));
        delta.extend_from_slice(&crate::delta::write_varint(4));
        delta.extend_from_slice(&crate::delta::encode_insert(b"xyzw"));
        writer.add_delta(missing_base, target_oid, &delta).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&pack_path).unwrap();
        let mut unpacker = Unpacker::new(Cursor::new(bytes)).unwrap();
        let result = unpacker.next().unwrap();
        assert!(matches!(result, Err(PackError::UnresolvedBase(_))));
    }

    #[test]
    fn external_resolver_supplies_ref_delta_base() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("thin.pack");

        let mut writer = PackWriter::new(&pack_path).unwrap();
        writer.set_thin(true);
        let base = b"base content for external resolution".to_vec();
        let base_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", &base).unwrap();

        let mut target = base.clone();
        target.push(b'$');
        let target_oid = Hasher::hash_object(HashAlgorithm::Sha1, "blob", &target).unwrap();

        let mut delta = Vec::new();
        delta.extend_from_slice(&crate::delta::write_varint(base.len()));
        delta.extend_from_slice(&crate::delta::write_varint(base.len() + 1));
        delta.extend_from_slice(&crate::delta::encode_copy(0, base.len()));
        delta.extend_from_slice(&crate::delta::encode_insert(b"$"));
        writer.add_delta(base_oid, target_oid, &delta).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&pack_path).unwrap();
        let base_for_resolver = base.clone();
        let unpacker = Unpacker::with_resolver(Cursor::new(bytes), move |oid| {
            if *oid == base_oid {
                Some((ObjectType::Blob, base_for_resolver.clone()))
            } else {
                None
            }
        })
        .unwrap();

        let results: Vec<UnpackedObject> = unpacker.map(|r| r.unwrap()).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data, target);
    }

    #[test]
    fn abort_clears_resolved_maps() {
        let objects = vec![(ObjectType::Blob, b"one".to_vec())];
        let bytes = pack_bytes(&objects);
        let mut unpacker = Unpacker::new(Cursor::new(bytes)).unwrap();
        let _ = unpacker.next();
        assert!(!unpacker.resolved_by_offset.is_empty());
        unpacker.abort();
        assert!(unpacker.resolved_by_offset.is_empty());
        assert!(unpacker.oid_to_offset.is_empty());
        assert!(unpacker.next().is_none());
    }
}
