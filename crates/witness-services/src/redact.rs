//! Redaction applied to every witness before it leaves the process.
//!
//! `Obfuscator` keeps the shape of each value and discards its content:
//! strings keep their length and character classes, numbers collapse to zero.

use witness_core::witness::{Data, Value};
use witness_core::Witness;

pub trait Redactor: Send + Sync {
    fn redact(&self, witness: Witness) -> Witness;
}

/// Leaves witnesses untouched. Only meant for local debugging and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRedaction;

impl Redactor for NoRedaction {
    fn redact(&self, witness: Witness) -> Witness {
        witness
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Obfuscator;

impl Redactor for Obfuscator {
    fn redact(&self, mut witness: Witness) -> Witness {
        let method = &mut witness.method;
        for data in method.args.values_mut().chain(method.responses.values_mut()) {
            obfuscate_data(data);
        }
        witness
    }
}

fn obfuscate_data(data: &mut Data) {
    obfuscate_value(&mut data.value);
}

fn obfuscate_value(value: &mut Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => *b = false,
        Value::Int64(i) => *i = 0,
        Value::Double(d) => *d = 0.0,
        Value::String(s) => *s = obfuscate_str(s),
        Value::Bytes(bytes) => bytes.iter_mut().for_each(|b| *b = 0),
        Value::List(items) => items.iter_mut().for_each(obfuscate_value),
        Value::Struct(fields) => fields.values_mut().for_each(obfuscate_value),
    }
}

fn obfuscate_str(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            c if c.is_ascii_digit() => '0',
            c if c.is_ascii_lowercase() => 'x',
            c if c.is_ascii_uppercase() => 'X',
            c => c,
        })
        .collect()
}
