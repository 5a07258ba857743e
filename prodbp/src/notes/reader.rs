//! Read `.note.stapsdt` descriptors back out of an ELF file
//!
//! Works on any ELF32/ELF64 object, not only images built here, so the
//! `notes` CLI command can inspect arbitrary binaries.

use object::elf::{FileHeader32, FileHeader64};
use object::endian::Endian;
use object::read::elf::{FileHeader, SectionHeader};
use object::{Endianness, FileKind};
use prodbp_common::NT_STAPSDT;

use super::encoder::NoteRecord;

/// Every SDT probe descriptor in `data`, in file order
///
/// Non-ELF input and ELF files without SDT notes yield an empty list.
///
/// # Errors
/// Returns an error if `data` is a malformed ELF file
pub fn read_stapsdt_notes(data: &[u8]) -> object::read::Result<Vec<NoteRecord>> {
    match FileKind::parse(data) {
        Ok(FileKind::Elf64) => parse_notes::<FileHeader64<Endianness>>(data),
        Ok(FileKind::Elf32) => parse_notes::<FileHeader32<Endianness>>(data),
        _ => Ok(Vec::new()),
    }
}

fn parse_notes<Elf: FileHeader<Endian = Endianness>>(
    data: &[u8],
) -> object::read::Result<Vec<NoteRecord>> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    let address_size = if header.is_type_64() { 8 } else { 4 };
    let sections = header.sections(endian, data)?;

    let mut records = Vec::new();
    for section in sections.iter() {
        let Some(mut notes) = section.notes(endian, data)? else {
            continue;
        };
        while let Some(note) = notes.next()? {
            if trim_nul(note.name()) != b"stapsdt" || note.n_type(endian) != NT_STAPSDT {
                continue;
            }
            if let Some(record) = decode_desc(note.desc(), endian, address_size) {
                records.push(record);
            }
        }
    }
    Ok(records)
}

fn trim_nul(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., 0] = bytes {
        bytes = rest;
    }
    bytes
}

/// Decode `pc, base, semaphore, provider\0 name\0 args\0`
fn decode_desc(desc: &[u8], endian: Endianness, address_size: usize) -> Option<NoteRecord> {
    let read_address = |at: usize| -> Option<u64> {
        let bytes = desc.get(at..at + address_size)?;
        Some(if address_size == 8 {
            endian.read_u64_bytes(bytes.try_into().ok()?)
        } else {
            u64::from(endian.read_u32_bytes(bytes.try_into().ok()?))
        })
    };
    let location = read_address(0)?;
    let base = read_address(address_size)?;
    let semaphore = read_address(2 * address_size)?;

    let mut strings = desc.get(3 * address_size..)?.split(|&b| b == 0);
    let mut next = || strings.next().map(|s| String::from_utf8_lossy(s).into_owned());
    let provider = next()?;
    let name = next()?;
    let arguments = next().unwrap_or_default();

    Some(NoteRecord { provider, name, location, base, semaphore, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::encoder::{argument_spec, build_image, ProbeSpec};

    #[test]
    fn test_reads_back_built_image() {
        let probes = [ProbeSpec::new("latency", 2), ProbeSpec::new("panic", 1)];
        let image = build_image("latency_orders", &probes).unwrap();
        let notes = read_stapsdt_notes(&image.bytes).unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].provider, "latency_orders");
        assert_eq!(notes[0].name, "latency");
        assert_eq!(notes[0].arguments, argument_spec(2));
        assert_eq!(notes[1].name, "panic");
        assert_eq!(notes[1].arguments, argument_spec(1));
        assert_eq!(notes[0].location, image.stub_offsets[0]);
        assert_eq!(notes[1].location, image.stub_offsets[1]);
        assert_eq!(notes[0].base, notes[1].base);
        assert!(notes.iter().all(|n| n.semaphore == 0));
    }

    #[test]
    fn test_non_elf_input_has_no_notes() {
        assert!(read_stapsdt_notes(b"definitely not an ELF file").unwrap().is_empty());
        assert!(read_stapsdt_notes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_desc_is_skipped() {
        let endian = Endianness::default();
        assert!(decode_desc(&[0; 10], endian, 8).is_none());
        let mut desc = vec![0u8; 24];
        desc.extend_from_slice(b"p\0n\0");
        let record = decode_desc(&desc, endian, 8).unwrap();
        assert_eq!((record.provider.as_str(), record.name.as_str()), ("p", "n"));
        assert_eq!(record.arguments, "");
    }
}
