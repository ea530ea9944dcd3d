//! Parameter storage
//!
//! The server only sees [`RemoteParameter`]: a name, a fixed size and raw
//! byte accessors. [`TypedParameter`] and [`BytesParameter`] keep the value
//! behind a [`ParameterHandle`] so the owning application can read and update
//! it while the server runs.

use crate::value::WireValue;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A named fixed-size value served remotely
pub trait RemoteParameter: Send + 'static {
    fn name(&self) -> &str;

    /// Size in bytes, constant for the life of the parameter
    fn size(&self) -> usize;

    /// Copy the current value into `buf`, which is exactly `size()` bytes
    fn read(&self, buf: &mut [u8]);

    /// Replace the value. `false` refuses the write and keeps the old value.
    fn write(&mut self, data: &[u8]) -> bool;
}

/// Shared access to a parameter value
pub struct ParameterHandle<T> {
    value: Arc<Mutex<T>>,
}

impl<T> Clone for ParameterHandle<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Clone> ParameterHandle<T> {
    fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> T {
        self.lock().clone()
    }

    /// Update locally. Validators and change callbacks only apply to remote
    /// writes.
    pub fn set(&self, value: T) {
        *self.lock() = value;
    }
}

type Validator<T> = Box<dyn Fn(&T) -> bool + Send>;
type Observer<T> = Box<dyn FnMut(&T) + Send>;

/// Parameter holding a [`WireValue`]
pub struct TypedParameter<T: WireValue> {
    name: String,
    value: ParameterHandle<T>,
    validator: Option<Validator<T>>,
    on_change: Option<Observer<T>>,
}

impl<T: WireValue> TypedParameter<T> {
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            name: name.into(),
            value: ParameterHandle::new(initial),
            validator: None,
            on_change: None,
        }
    }

    /// Refuse remote writes for which `validator` returns false
    pub fn with_validator(mut self, validator: impl Fn(&T) -> bool + Send + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Called on the server thread after each accepted remote write
    pub fn on_change(mut self, observer: impl FnMut(&T) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(observer));
        self
    }

    pub fn handle(&self) -> ParameterHandle<T> {
        self.value.clone()
    }
}

impl<T: WireValue> RemoteParameter for TypedParameter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        T::SIZE
    }

    fn read(&self, buf: &mut [u8]) {
        self.value.get().encode(buf);
    }

    fn write(&mut self, data: &[u8]) -> bool {
        if data.len() != T::SIZE {
            warn!(
                "Parameter {}: received {} bytes, expected {}",
                self.name,
                data.len(),
                T::SIZE
            );
            return false;
        }

        let Some(value) = T::decode(data) else {
            warn!("Parameter {}: invalid encoding", self.name);
            return false;
        };

        if let Some(validator) = &self.validator {
            if !validator(&value) {
                debug!("Parameter {}: value refused", self.name);
                return false;
            }
        }

        self.value.set(value.clone());
        if let Some(observer) = self.on_change.as_mut() {
            observer(&value);
        }
        true
    }
}

type BytesValidator = Box<dyn Fn(&[u8]) -> bool + Send>;
type BytesObserver = Box<dyn FnMut(&[u8]) + Send>;

/// Parameter holding an opaque byte buffer
pub struct BytesParameter {
    name: String,
    size: usize,
    value: ParameterHandle<Vec<u8>>,
    validator: Option<BytesValidator>,
    on_change: Option<BytesObserver>,
}

impl BytesParameter {
    /// Zero-filled buffer of `size` bytes
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self::with_initial(name, vec![0; size])
    }

    /// The parameter size is the length of `initial`
    pub fn with_initial(name: impl Into<String>, initial: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: initial.len(),
            value: ParameterHandle::new(initial),
            validator: None,
            on_change: None,
        }
    }

    pub fn with_validator(mut self, validator: impl Fn(&[u8]) -> bool + Send + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn on_change(mut self, observer: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(observer));
        self
    }

    /// Local access. Keep the buffer at its registered length: the server
    /// pads or truncates anything else when answering a get.
    pub fn handle(&self) -> ParameterHandle<Vec<u8>> {
        self.value.clone()
    }
}

impl RemoteParameter for BytesParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, buf: &mut [u8]) {
        let value = self.value.lock();
        let len = value.len().min(buf.len());
        buf[..len].copy_from_slice(&value[..len]);
        buf[len..].fill(0);
    }

    fn write(&mut self, data: &[u8]) -> bool {
        if data.len() != self.size {
            warn!(
                "Parameter {}: received {} bytes, expected {}",
                self.name,
                data.len(),
                self.size
            );
            return false;
        }

        if let Some(validator) = &self.validator {
            if !validator(data) {
                debug!("Parameter {}: value refused", self.name);
                return false;
            }
        }

        self.value.set(data.to_vec());
        if let Some(observer) = self.on_change.as_mut() {
            observer(data);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_read(param: &dyn RemoteParameter) -> Vec<u8> {
        let mut buf = vec![0xAA; param.size()];
        param.read(&mut buf);
        buf
    }

    #[test]
    fn test_typed_write_checks_size() {
        let mut volume = TypedParameter::new("volume", 0u32);
        assert_eq!(volume.size(), 4);
        assert!(!volume.write(&[1, 2]));
        assert!(!volume.write(&[0; 8]));
        assert_eq!(volume.handle().get(), 0);

        assert!(volume.write(&50u32.to_ne_bytes()));
        assert_eq!(volume.handle().get(), 50);
        assert_eq!(remote_read(&volume), 50u32.to_ne_bytes());
    }

    #[test]
    fn test_typed_write_rejects_invalid_encoding() {
        let mut mute = TypedParameter::new("mute", false);
        assert!(!mute.write(&[7]));
        assert!(mute.write(&[1]));
        assert!(mute.handle().get());
    }

    #[test]
    fn test_validator_and_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut gain = TypedParameter::new("gain", 0i32)
            .with_validator(|v| (-10..=10).contains(v))
            .on_change(move |v| sink.lock().unwrap().push(*v));

        assert!(!gain.write(&20i32.to_ne_bytes()));
        assert!(gain.write(&(-4i32).to_ne_bytes()));
        assert_eq!(gain.handle().get(), -4);
        assert_eq!(*seen.lock().unwrap(), vec![-4]);
    }

    #[test]
    fn test_local_update_visible_remotely() {
        let volume = TypedParameter::new("volume", 1u16);
        let handle = volume.handle();
        handle.set(9);
        assert_eq!(remote_read(&volume), 9u16.to_ne_bytes());
    }

    #[test]
    fn test_bytes_parameter() {
        let mut calib = BytesParameter::new("calibration", 4).with_validator(|d| d[0] != 0xff);
        assert_eq!(remote_read(&calib), [0, 0, 0, 0]);

        assert!(!calib.write(&[1, 2, 3]));
        assert!(!calib.write(&[0xff, 0, 0, 0]));
        assert!(calib.write(&[1, 2, 3, 4]));
        assert_eq!(calib.handle().get(), vec![1, 2, 3, 4]);

        calib.handle().set(vec![9]);
        assert_eq!(remote_read(&calib), [9, 0, 0, 0]);
    }
}
