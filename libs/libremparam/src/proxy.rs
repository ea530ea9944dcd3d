//! Client side of the protocol
//!
//! Every call opens a fresh connection, runs exactly one transaction and
//! closes it again.

use crate::connector::{Connector, Namespace};
use crate::protocol::{self, Status, COMMAND_GET, DEFAULT_TIMEOUT};
use crate::value::WireValue;
use crate::{Error, ProtocolError, Result};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

/// Untyped proxy to one remote parameter
#[derive(Debug, Clone)]
pub struct ParameterProxy {
    name: String,
    endpoint: String,
    namespace: Namespace,
    timeout: Duration,
}

impl ParameterProxy {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            endpoint: protocol::endpoint_name(&name),
            name,
            namespace: Namespace::Abstract,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<Connector> {
        let connector =
            Connector::connect(&self.namespace, &self.endpoint).map_err(|source| {
                Error::Connection {
                    endpoint: self.namespace.describe(&self.endpoint),
                    source,
                }
            })?;
        connector.set_timeout(self.timeout)?;
        Ok(connector)
    }

    /// Replace the remote value with `value`
    pub fn set(&self, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(ProtocolError::EmptyValue.into());
        }
        let size =
            u32::try_from(value.len()).map_err(|_| ProtocolError::ValueTooLarge(value.len()))?;

        let connector = self.connect()?;
        connector.send_u32(size).map_err(ProtocolError::SendSize)?;
        connector.send(value).map_err(ProtocolError::SendData)?;
        let status = connector
            .receive_u32()
            .map_err(ProtocolError::ReceiveStatus)?;

        if Status::from_code(status) != Status::Success {
            return Err(ProtocolError::TransactionRefused.into());
        }

        debug!("Set {} ({} bytes)", self.name, value.len());
        Ok(())
    }

    /// Read the remote value into `buf`, returning its size
    pub fn get(&self, buf: &mut [u8]) -> Result<usize> {
        let connector = self.connect()?;
        connector
            .send_u32(COMMAND_GET)
            .map_err(ProtocolError::SendGet)?;
        let size = connector.receive_u32().map_err(ProtocolError::ReceiveSize)?;

        let len = size as usize;
        if len > buf.len() {
            return Err(ProtocolError::SizeExceedsCapacity {
                answered: size,
                capacity: buf.len(),
            }
            .into());
        }

        connector
            .receive(&mut buf[..len])
            .map_err(ProtocolError::ReceiveData)?;

        debug!("Got {} ({} bytes)", self.name, len);
        Ok(len)
    }
}

/// Proxy to a parameter holding a [`WireValue`]
#[derive(Debug, Clone)]
pub struct TypedProxy<T> {
    proxy: ParameterProxy,
    _value: PhantomData<fn() -> T>,
}

impl<T: WireValue> TypedProxy<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from(ParameterProxy::new(name))
    }

    pub fn with_namespace(self, namespace: Namespace) -> Self {
        Self::from(self.proxy.with_namespace(namespace))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self::from(self.proxy.with_timeout(timeout))
    }

    pub fn get(&self) -> Result<T> {
        let mut buf = vec![0u8; T::SIZE];
        let received = self.proxy.get(&mut buf)?;
        if received != T::SIZE {
            return Err(ProtocolError::SizeMismatch {
                expected: T::SIZE,
                received,
            }
            .into());
        }
        T::decode(&buf).ok_or_else(|| ProtocolError::InvalidValue(std::any::type_name::<T>()).into())
    }

    pub fn set(&self, value: &T) -> Result<()> {
        let mut buf = vec![0u8; T::SIZE];
        value.encode(&mut buf);
        self.proxy.set(&buf)
    }
}

impl<T: WireValue> From<ParameterProxy> for TypedProxy<T> {
    fn from(proxy: ParameterProxy) -> Self {
        Self {
            proxy,
            _value: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_rejected_locally() {
        let proxy = ParameterProxy::new("unused");
        assert!(matches!(
            proxy.set(&[]),
            Err(Error::Protocol(ProtocolError::EmptyValue))
        ));
    }

    #[test]
    fn test_builder() {
        let proxy = ParameterProxy::new("volume")
            .with_namespace(Namespace::Directory("/run/remparam".into()))
            .with_timeout(Duration::from_millis(100));
        assert_eq!(proxy.name(), "volume");
        assert_eq!(proxy.endpoint, "parameter.volume");
        assert_eq!(proxy.timeout, Duration::from_millis(100));
    }
}
