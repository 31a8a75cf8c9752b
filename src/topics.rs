//! Event topic names. Per-field topics append `:<path>` to a base topic.

pub const INIT: &str = "init";
pub const RESET: &str = "reset";
pub const CONFIG_UPDATE: &str = "config-update";
pub const CHANGE: &str = "change";
pub const ERROR: &str = "error";
pub const TOUCH: &str = "touch";
pub const FOCUS: &str = "focus";
pub const BLUR: &str = "blur";
pub const ACTIVE: &str = "active";
pub const DIRTY: &str = "dirty";
pub const PRISTINE: &str = "pristine";
pub const SUBMITTING: &str = "submitting";
pub const SUBMIT: &str = "submit";
pub const VALIDATION: &str = "validation";

pub fn field(base: &str, path: &str) -> String {
    format!("{base}:{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_topics_join_base_and_path() {
        assert_eq!(field(CHANGE, "user.email"), "change:user.email");
        assert_eq!(field(PRISTINE, "items[0]"), "pristine:items[0]");
    }
}
