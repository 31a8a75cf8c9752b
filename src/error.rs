use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    NotInitialized,
    StatePoisoned(&'static str),
    Listener { topic: String, message: String },
    BatchNotRun,
    EngineDropped,
    Config(String),
    Conversion(String),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::NotInitialized => f.write_str("form engine must be initialized"),
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::Listener { topic, message } => {
                write!(f, "listener for `{topic}` failed: {message}")
            }
            FormError::BatchNotRun => f.write_str("batch body was never executed"),
            FormError::EngineDropped => f.write_str("form engine has been dropped"),
            FormError::Config(error) => write!(f, "invalid form config: {error}"),
            FormError::Conversion(error) => write!(f, "value conversion failed: {error}"),
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

/// Service-internal locks never run user callbacks while held, so a poisoned
/// guard still protects consistent data.
pub(crate) fn lock_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn read_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_error_has_fixed_message() {
        assert_eq!(
            FormError::NotInitialized.to_string(),
            "form engine must be initialized"
        );
    }

    #[test]
    fn poisoned_lock_maps_to_state_poisoned() {
        let lock = std::sync::Arc::new(RwLock::new(0_u8));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().expect("first writer");
            panic!("poison the lock");
        })
        .join();

        assert_eq!(
            read_lock(&lock, "reading test value").err(),
            Some(FormError::StatePoisoned("reading test value"))
        );
        assert_eq!(*read_recover(&lock), 0);
    }
}
