use crate::state::FormState;
use crate::value::FormValue;

const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const PRIME: u64 = 0x00000100000001b3;

/// FNV-1a, used only to derive cache keys from state snapshots.
#[derive(Clone, Copy, Debug)]
pub struct Fnv1a64(u64);

impl Fnv1a64 {
    pub const fn new() -> Self {
        Self(OFFSET_BASIS)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    pub fn write_str(&mut self, value: &str) {
        self.write(&(value.len() as u64).to_le_bytes());
        self.write(value.as_bytes());
    }

    pub fn write_value(&mut self, value: &FormValue) {
        match value {
            FormValue::Null => self.write(&[0]),
            FormValue::Bool(flag) => self.write(&[1, u8::from(*flag)]),
            FormValue::Number(number) => {
                self.write(&[2]);
                self.write_str(&number.to_string());
            }
            FormValue::String(text) => {
                self.write(&[3]);
                self.write_str(text);
            }
            FormValue::List(items) => {
                self.write(&[4]);
                self.write(&(items.len() as u64).to_le_bytes());
                for item in items.iter() {
                    self.write_value(item);
                }
            }
            FormValue::Map(entries) => {
                self.write(&[5]);
                self.write(&(entries.len() as u64).to_le_bytes());
                for (key, item) in entries.iter() {
                    self.write_str(key);
                    self.write_value(item);
                }
            }
        }
    }

    pub const fn finish(self) -> u64 {
        self.0
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hasher = Fnv1a64::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Deterministic key for a form-state snapshot. The touched list is sorted by
/// construction, so the key does not depend on touch order.
pub fn hash_form_state(state: &FormState) -> u64 {
    let mut hasher = Fnv1a64::new();
    hasher.write_value(&state.values);
    hasher.write(&(state.errors.len() as u64).to_le_bytes());
    for (path, error) in &state.errors {
        hasher.write_str(path);
        hasher.write_str(error);
    }
    hasher.write(&(state.touched.len() as u64).to_le_bytes());
    for path in &state.touched {
        hasher.write_str(path);
    }
    match &state.active {
        Some(path) => {
            hasher.write(&[1]);
            hasher.write_str(path);
        }
        None => hasher.write(&[0]),
    }
    hasher.write(&[
        u8::from(state.submitting),
        u8::from(state.valid),
        u8::from(state.dirty),
        u8::from(state.pristine),
    ]);
    hasher.finish()
}
