#![allow(dead_code)]

pub struct MyClass;

impl MyClass {
    pub fn some_method(&self) -> u64 {
        SOME_METHOD.invoke(|| {
            2
        })
    }

    pub fn divide(&self, divisor: u64) -> u64 {
        DIVIDE.invoke(|| {
            84 / divisor
        })
    }
}

prodbp::instrumentable! {
    pub fn free_function(x: u64) -> u64 {
        x * 3
    }
}

pub static SOME_METHOD: prodbp::CodeUnit = prodbp::code_unit!("some_method");
pub static DIVIDE: prodbp::CodeUnit = prodbp::code_unit!("divide");

pub const TARGET: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/breakpoint_target.rs");

pub fn units() -> [&'static prodbp::CodeUnit; 3] {
    [&SOME_METHOD, &DIVIDE, &free_function::UNIT]
}
