//! Byte-level encoding of SDT notes and provider images
//!
//! ## Note Record (ELF64)
//!
//! ```text
//! +-----------+-----------+-----------+
//! | n_namesz  | n_descsz  | n_type=3  |   3 × u32
//! +-----------+-----------+-----------+
//! | "stapsdt\0"                       |   8 bytes
//! +-----------------------------------+
//! | pc: u64 | base: u64 | sem: u64    |   probe site, .stapsdt.base, semaphore
//! | provider\0 name\0 args\0          |
//! | padding to 4                      |
//! +-----------------------------------+
//! ```
//!
//! ## Provider Image
//!
//! ```text
//! offset 0     ELF header (ET_DYN)
//!              1 × PT_LOAD, R+X, vaddr == offset, covers the whole file
//! 0x80         .text          one 16-byte stub per probe (`nop; ret`)
//!              .stapsdt.base  1 byte
//!              .note.stapsdt  one note per probe (not loaded)
//!              .shstrtab, section headers
//! ```
//!
//! Because vaddr equals file offset, a note's `pc` is also the file offset
//! uprobes attach to, whatever address the image is mapped at.

use object::elf;
use object::endian::Endian;
use object::write::elf::{FileHeader, ProgramHeader, SectionHeader, Writer};
use object::Endianness;
use prodbp_common::{
    ARG_REGISTERS, ARG_SIZE, MAX_PROBE_ARGS, NOTE_DESC_HEADER_SIZE, NT_STAPSDT, PROBE_STUB,
    PROBE_STUB_SLOT, STAPSDT_NOTE_NAME,
};
use serde::Serialize;

use crate::domain::BreakpointError;

/// Longest provider or probe name accepted
pub const MAX_NAME_LEN: usize = 128;

/// Most probes a single provider may define
pub const MAX_PROBES: usize = 32;

const PAGE_ALIGN: u64 = 0x1000;

#[cfg(target_arch = "x86_64")]
const ELF_MACHINE: u16 = elf::EM_X86_64;
#[cfg(target_arch = "aarch64")]
const ELF_MACHINE: u16 = elf::EM_AARCH64;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const ELF_MACHINE: u16 = elf::EM_NONE;

/// Name and argument count of one probe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeSpec {
    pub name: String,
    pub args: usize,
}

impl ProbeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, args: usize) -> Self {
        Self { name: name.into(), args }
    }
}

/// One probe descriptor, as external tools see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRecord {
    pub provider: String,
    pub name: String,
    /// Probe site address (`pc`)
    pub location: u64,
    /// Link-time address of `.stapsdt.base`
    pub base: u64,
    /// Semaphore address, 0 when the probe has none
    pub semaphore: u64,
    pub arguments: String,
}

/// A fully laid out provider ELF image
#[derive(Debug, Clone)]
pub struct ProviderImage {
    pub bytes: Vec<u8>,
    /// File offset (== vaddr) of each probe stub, in probe order
    pub stub_offsets: Vec<u64>,
}

/// `stapsdt` argument string for `count` u64 register arguments
#[must_use]
pub fn argument_spec(count: usize) -> String {
    ARG_REGISTERS
        .iter()
        .take(count)
        .map(|reg| format!("{ARG_SIZE}@{reg}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check that `name` can appear as a provider or probe name
///
/// # Errors
/// Returns `Encoding` for empty, overlong or non `[A-Za-z0-9_]` names
pub fn validate_name(name: &str) -> Result<(), BreakpointError> {
    if name.is_empty() {
        return Err(BreakpointError::Encoding("empty name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BreakpointError::Encoding(format!(
            "name `{name}` exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(BreakpointError::Encoding(format!(
            "name `{name}` may only contain ASCII letters, digits and `_`"
        )));
    }
    Ok(())
}

/// Encode one note record in native byte order
#[must_use]
pub fn encode_note(record: &NoteRecord) -> Vec<u8> {
    let endian = Endianness::default();
    let mut desc = Vec::with_capacity(
        NOTE_DESC_HEADER_SIZE + record.provider.len() + record.name.len() + record.arguments.len() + 3,
    );
    desc.extend_from_slice(&endian.write_u64_bytes(record.location));
    desc.extend_from_slice(&endian.write_u64_bytes(record.base));
    desc.extend_from_slice(&endian.write_u64_bytes(record.semaphore));
    for field in [&record.provider, &record.name, &record.arguments] {
        desc.extend_from_slice(field.as_bytes());
        desc.push(0);
    }

    let mut note = Vec::with_capacity(12 + STAPSDT_NOTE_NAME.len() + desc.len() + 3);
    note.extend_from_slice(&endian.write_u32_bytes(len_u32(STAPSDT_NOTE_NAME.len())));
    note.extend_from_slice(&endian.write_u32_bytes(len_u32(desc.len())));
    note.extend_from_slice(&endian.write_u32_bytes(NT_STAPSDT));
    note.extend_from_slice(STAPSDT_NOTE_NAME);
    note.extend_from_slice(&desc);
    note.resize(note.len().next_multiple_of(4), 0);
    note
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn encoding_error(err: &object::write::Error) -> BreakpointError {
    BreakpointError::Encoding(err.to_string())
}

/// Lay out the provider image for `provider` and its `probes`
///
/// # Errors
/// Returns `Encoding` for invalid names, an empty or oversized probe set,
/// too many probe arguments, or an ELF writer failure
#[allow(clippy::too_many_lines)]
pub fn build_image(provider: &str, probes: &[ProbeSpec]) -> Result<ProviderImage, BreakpointError> {
    validate_name(provider)?;
    if probes.is_empty() || probes.len() > MAX_PROBES {
        return Err(BreakpointError::Encoding(format!(
            "provider {provider} needs 1..={MAX_PROBES} probes, got {}",
            probes.len()
        )));
    }
    for (i, probe) in probes.iter().enumerate() {
        validate_name(&probe.name)?;
        if probe.args > MAX_PROBE_ARGS {
            return Err(BreakpointError::Encoding(format!(
                "probe {} takes {} arguments, at most {MAX_PROBE_ARGS} are supported",
                probe.name, probe.args
            )));
        }
        if probes[..i].iter().any(|earlier| earlier.name == probe.name) {
            return Err(BreakpointError::Encoding(format!("probe {} defined twice", probe.name)));
        }
    }

    let endian = Endianness::default();
    let mut buffer = Vec::new();
    let mut writer = Writer::new(endian, true, &mut buffer);

    // ── Reserve ─────────────────────────────────────────────────────────
    writer.reserve_file_header();
    writer.reserve_program_headers(1);

    let text_name = writer.add_section_name(b".text");
    let base_name = writer.add_section_name(prodbp_common::BASE_SECTION.as_bytes());
    let note_name = writer.add_section_name(prodbp_common::NOTE_SECTION.as_bytes());
    writer.reserve_null_section_index();
    writer.reserve_section_index();
    writer.reserve_section_index();
    writer.reserve_section_index();
    writer.reserve_shstrtab_section_index();

    let text_len = probes.len() * PROBE_STUB_SLOT;
    let text_offset = writer.reserve(text_len, PROBE_STUB_SLOT);
    let base_offset = writer.reserve(1, 1);

    let stub_offsets: Vec<u64> =
        (0..probes.len()).map(|i| (text_offset + i * PROBE_STUB_SLOT) as u64).collect();
    let notes: Vec<u8> = probes
        .iter()
        .zip(&stub_offsets)
        .flat_map(|(probe, &location)| {
            encode_note(&NoteRecord {
                provider: provider.to_string(),
                name: probe.name.clone(),
                location,
                base: base_offset as u64,
                semaphore: 0,
                arguments: argument_spec(probe.args),
            })
        })
        .collect();
    let note_offset = writer.reserve(notes.len(), 4);

    writer.reserve_shstrtab();
    writer.reserve_section_headers();
    let image_len = writer.reserved_len() as u64;

    // ── Write ───────────────────────────────────────────────────────────
    writer
        .write_file_header(&FileHeader {
            os_abi: elf::ELFOSABI_NONE,
            abi_version: 0,
            e_type: elf::ET_DYN,
            e_machine: ELF_MACHINE,
            e_entry: 0,
            e_flags: 0,
        })
        .map_err(|e| encoding_error(&e))?;

    writer.write_align_program_headers();
    writer.write_program_header(&ProgramHeader {
        p_type: elf::PT_LOAD,
        p_flags: elf::PF_R | elf::PF_X,
        p_offset: 0,
        p_vaddr: 0,
        p_paddr: 0,
        p_filesz: image_len,
        p_memsz: image_len,
        p_align: PAGE_ALIGN,
    });

    let mut text = vec![0u8; text_len];
    for slot in text.chunks_mut(PROBE_STUB_SLOT) {
        slot[..PROBE_STUB.len()].copy_from_slice(PROBE_STUB);
    }
    writer.write_align(PROBE_STUB_SLOT);
    writer.write(&text);
    writer.write(&[0]);
    writer.write_align(4);
    writer.write(&notes);
    writer.write_shstrtab();

    writer.write_null_section_header();
    writer.write_section_header(&SectionHeader {
        name: Some(text_name),
        sh_type: elf::SHT_PROGBITS,
        sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
        sh_addr: text_offset as u64,
        sh_offset: text_offset as u64,
        sh_size: text_len as u64,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: PROBE_STUB_SLOT as u64,
        sh_entsize: 0,
    });
    writer.write_section_header(&SectionHeader {
        name: Some(base_name),
        sh_type: elf::SHT_PROGBITS,
        sh_flags: u64::from(elf::SHF_ALLOC),
        sh_addr: base_offset as u64,
        sh_offset: base_offset as u64,
        sh_size: 1,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 1,
        sh_entsize: 0,
    });
    writer.write_section_header(&SectionHeader {
        name: Some(note_name),
        sh_type: elf::SHT_NOTE,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: note_offset as u64,
        sh_size: notes.len() as u64,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 4,
        sh_entsize: 0,
    });
    writer.write_shstrtab_section_header();

    if buffer.len() as u64 != image_len {
        return Err(BreakpointError::Encoding(format!(
            "provider image for {provider} is {} bytes, expected {image_len}",
            buffer.len()
        )));
    }

    Ok(ProviderImage { bytes: buffer, stub_offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Object, ObjectSection, ObjectSegment};

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        Endianness::default().read_u32_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn read_u64(bytes: &[u8], at: usize) -> u64 {
        Endianness::default().read_u64_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn test_note_layout_is_byte_exact() {
        let note = encode_note(&NoteRecord {
            provider: "latency_checkout".to_string(),
            name: "latency".to_string(),
            location: 0x80,
            base: 0xa0,
            semaphore: 0,
            arguments: "8@%rdi".to_string(),
        });

        let desc_len = 24 + "latency_checkout\0".len() + "latency\0".len() + "8@%rdi\0".len();
        assert_eq!(read_u32(&note, 0), 8);
        assert_eq!(read_u32(&note, 4) as usize, desc_len);
        assert_eq!(read_u32(&note, 8), 3);
        assert_eq!(&note[12..20], b"stapsdt\0");
        assert_eq!(read_u64(&note, 20), 0x80);
        assert_eq!(read_u64(&note, 28), 0xa0);
        assert_eq!(read_u64(&note, 36), 0);
        assert_eq!(&note[44..61], b"latency_checkout\0");
        assert_eq!(&note[61..69], b"latency\0");
        assert_eq!(&note[69..76], b"8@%rdi\0");
        assert_eq!(note.len(), (20 + desc_len).next_multiple_of(4));
        assert!(note[20 + desc_len..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_argument_spec() {
        assert_eq!(argument_spec(0), "");
        let spec = argument_spec(2);
        assert_eq!(spec.split(' ').count(), 2);
        assert!(spec.split(' ').all(|arg| arg.starts_with("8@")));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("latency_test_breakpoint_install").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has-dash").is_err());
        assert!(validate_name("nul\0byte").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_image_is_a_loadable_elf() {
        let probes = [ProbeSpec::new("latency", 2), ProbeSpec::new("panic", 2)];
        let image = build_image("orders", &probes).unwrap();
        let file = object::File::parse(&*image.bytes).unwrap();

        assert_eq!(file.kind(), object::ObjectKind::Dynamic);
        let segments: Vec<_> = file.segments().collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].address(), 0);
        assert_eq!(segments[0].size(), image.bytes.len() as u64);

        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.size(), 2 * PROBE_STUB_SLOT as u64);
        for offset in &image.stub_offsets {
            let at = usize::try_from(*offset).unwrap();
            assert_eq!(&image.bytes[at..at + PROBE_STUB.len()], PROBE_STUB);
        }
        assert!(file.section_by_name(".stapsdt.base").is_some());
        assert!(file.section_by_name(".note.stapsdt").is_some());
    }

    #[test]
    fn test_rejects_bad_probe_sets() {
        assert!(build_image("orders", &[]).is_err());
        assert!(build_image("orders", &[ProbeSpec::new("a", 7)]).is_err());
        assert!(build_image("orders", &[ProbeSpec::new("a", 1), ProbeSpec::new("a", 1)]).is_err());
        assert!(build_image("bad name", &[ProbeSpec::new("a", 1)]).is_err());
    }
}
