//! Latency breakpoint on the fixture's `some_method`, through the
//! process-wide controller

#[path = "fixtures/breakpoint_target.rs"]
mod breakpoint_target;

use breakpoint_target::{MyClass, SOME_METHOD, TARGET};
use prodbp::notes::read_stapsdt_notes;
use prodbp::{BreakpointState, BreakpointType, TraceId};

#[test]
fn test_install_breakpoint() {
    let trace_id = TraceId::from("test_breakpoint_install");
    prodbp::register_units(&breakpoint_target::units());

    let installed = prodbp::install_breakpoint(BreakpointType::Latency, TARGET, 7, 9, &trace_id)
        .expect("Failed to install breakpoint");
    assert_eq!(installed.state, BreakpointState::InstalledDisabled);

    let all = prodbp::installed_breakpoints();
    let bp = &all[&trace_id];
    assert!(!bp.provider_name.is_empty());
    assert!(!bp.name.is_empty());
    assert_eq!(bp.provider_name, "latency_test_breakpoint_install");
    assert_eq!(bp.name, "latency");
    assert!(bp.unit.ends_with("some_method"));
    println!("Installed {} -> {}:{}", bp.trace_id, bp.provider_name, bp.name);

    let c = MyClass;
    assert_eq!(c.some_method(), 2);

    prodbp::enable_breakpoint(&trace_id).expect("Failed to enable breakpoint");
    assert!(SOME_METHOD.breakpoint_enabled());
    for _ in 0..1000 {
        assert_eq!(c.some_method(), 2);
    }

    // What an external tracer sees
    match prodbp::global().provider_location(&bp.provider_name) {
        Some(location) => {
            println!("Provider image: {}", location.display());
            let image = std::fs::read(&location).expect("Failed to read provider image");
            let notes = read_stapsdt_notes(&image).expect("Failed to parse provider notes");
            assert_eq!(notes.len(), 1);
            assert_eq!(notes[0].provider, bp.provider_name);
            assert_eq!(notes[0].name, bp.name);
        }
        None => println!("Provider image not published on this host, skipping note check"),
    }

    prodbp::disable_breakpoint(&trace_id).expect("Failed to disable breakpoint");
    assert!(!SOME_METHOD.breakpoint_enabled());
    assert_eq!(c.some_method(), 2);

    let last = prodbp::uninstall_breakpoint(&trace_id).expect("Failed to uninstall breakpoint");
    assert_eq!(last.state, BreakpointState::Uninstalled);
    assert!(!prodbp::installed_breakpoints().contains_key(&trace_id));
    assert!(!SOME_METHOD.is_instrumented());
    assert_eq!(c.some_method(), 2);

    println!("✅ Breakpoint installed, fired and removed");
}
