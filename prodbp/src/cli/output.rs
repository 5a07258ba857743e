//! Text rendering for CLI output

use std::fmt::Write;

use crate::notes::NoteRecord;

/// `readelf --notes` style listing of SDT descriptors
#[must_use]
pub fn format_notes(notes: &[NoteRecord]) -> String {
    let mut out = String::new();
    for note in notes {
        let _ = writeln!(out, "  stapsdt              NT_STAPSDT (SystemTap probe descriptors)");
        let _ = writeln!(out, "    Provider: {}", note.provider);
        let _ = writeln!(out, "    Name: {}", note.name);
        let _ = writeln!(
            out,
            "    Location: 0x{:016x}, Base: 0x{:016x}, Semaphore: 0x{:016x}",
            note.location, note.base, note.semaphore
        );
        let _ = writeln!(out, "    Arguments: {}", note.arguments);
    }
    out
}

/// One-liner operators can paste to watch a probe
#[must_use]
pub fn bpftrace_hint(location: &str, provider: &str, probe: &str, pid: u32) -> String {
    format!(
        "bpftrace -p {pid} -e 'usdt:{location}:{provider}:{probe} \
         {{ printf(\"%s %d ns\\n\", str(arg0), arg1); }}'"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_match_readelf_layout() {
        let out = format_notes(&[NoteRecord {
            provider: "latency_t".into(),
            name: "latency".into(),
            location: 0x80,
            base: 0xa0,
            semaphore: 0,
            arguments: "8@%rdi 8@%rsi".into(),
        }]);
        let provider = out.lines().find(|l| l.trim_start().starts_with("Provider:")).unwrap();
        assert_eq!(provider.split_whitespace().last(), Some("latency_t"));
        let name = out.lines().find(|l| l.trim_start().starts_with("Name:")).unwrap();
        assert_eq!(name.split_whitespace().last(), Some("latency"));
        assert!(out.contains("Location: 0x0000000000000080"));
    }

    #[test]
    fn test_hint_names_probe() {
        let hint = bpftrace_hint("/proc/1/fd/3", "latency_t", "latency", 1);
        assert!(hint.starts_with("bpftrace -p 1 -e 'usdt:/proc/1/fd/3:latency_t:latency {"));
    }
}
