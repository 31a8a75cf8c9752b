use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::FormConfig;
use crate::error::FormResult;
use crate::form::{FormEngine, SetOptions};
use crate::value::FormValue;

pub use calm_form_derive::FormModel;

/// Path of one model field inside the value tree, in the dot/bracket syntax
/// of [`crate::path`]. Derived models use the field name or its
/// `#[form(rename = "...")]` value, so keys can be passed wherever the engine
/// takes a path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(path: &'static str) -> Self {
        Self(path)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for FieldKey {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub trait FieldLens<T>: Copy + Send + Sync + 'static {
    type Value: Clone + PartialEq + Send + Sync + 'static;

    fn key(self) -> FieldKey;
    fn get<'a>(self, model: &'a T) -> &'a Self::Value;
    fn set(self, model: &mut T, value: Self::Value);
}

/// A struct whose fields map onto the top level of a form's value tree.
/// Usually derived with `#[derive(FormModel)]`.
pub trait FormModel: Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
    fn field_keys() -> &'static [FieldKey];
}

impl FormEngine {
    pub fn init_model<T>(&self, model: &T, config: FormConfig) -> FormResult<&Self>
    where
        T: FormModel + Serialize,
    {
        self.init(FormValue::from_serialize(model)?, config)
    }

    pub fn model<T>(&self) -> FormResult<T>
    where
        T: FormModel + DeserializeOwned,
    {
        self.values()?.deserialize_into()
    }

    pub fn get_field<T, L>(&self, lens: L) -> FormResult<L::Value>
    where
        L: FieldLens<T>,
        L::Value: DeserializeOwned,
    {
        self.get(lens.key())?.deserialize_into()
    }

    pub fn set_field<T, L>(&self, lens: L, value: &L::Value, options: SetOptions) -> FormResult<()>
    where
        L: FieldLens<T>,
        L::Value: Serialize,
    {
        self.set(lens.key(), FormValue::from_serialize(value)?, options)
    }
}
