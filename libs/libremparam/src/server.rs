//! Parameter server
//!
//! Each parameter gets its own listening endpoint. The reactor thread
//! accepts connections, checks the peer credentials against those of the
//! listening socket, then runs a single transaction before closing.

use crate::connector::{Connector, Credentials, Listener, Namespace};
use crate::parameter::RemoteParameter;
use crate::protocol::{self, Request, Status, DEFAULT_TIMEOUT, MAX_SET_PAYLOAD};
use crate::{Error, Result};
use libreactor::{ClientId, EventListener, Reactor, ReactorConfig, ReactorContext, SetChange};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Which clients may talk to the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum AccessPolicy {
    /// Peer group matches the server's
    #[default]
    SameGroup,
    /// Peer user matches the server's
    SameUser,
    SameUserAndGroup,
}

impl AccessPolicy {
    pub fn allows(self, server: &Credentials, peer: &Credentials) -> bool {
        match self {
            AccessPolicy::SameGroup => peer.gid == server.gid,
            AccessPolicy::SameUser => peer.uid == server.uid,
            AccessPolicy::SameUserAndGroup => peer.uid == server.uid && peer.gid == server.gid,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the server thread
    pub name: String,
    pub namespace: Namespace,
    /// Applied to both directions of every accepted connection
    pub timeout: Duration,
    pub access: AccessPolicy,
    /// Log every poll event dispatched by the reactor
    pub trace_events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "remparam".to_string(),
            namespace: Namespace::Abstract,
            timeout: DEFAULT_TIMEOUT,
            access: AccessPolicy::default(),
            trace_events: false,
        }
    }
}

struct Endpoint {
    listener: Listener,
    credentials: Credentials,
    parameter: Box<dyn RemoteParameter>,
    size_field: u32,
}

impl Endpoint {
    fn serve(&mut self, timeout: Duration, access: AccessPolicy) {
        let connector = match self.listener.accept() {
            Ok(connector) => connector,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("{}: connection vanished before accept", self.listener.endpoint());
                return;
            }
            Err(e) => {
                error!("{}: accept failed: {}", self.listener.endpoint(), e);
                return;
            }
        };

        let peer = match connector.peer_credentials() {
            Ok(peer) => peer,
            Err(e) => {
                warn!("{}: cannot read peer credentials: {}", self.listener.endpoint(), e);
                return;
            }
        };

        if !access.allows(&self.credentials, &peer) {
            warn!(
                "{}: security error, rejecting pid {} (uid {}, gid {})",
                self.listener.endpoint(),
                peer.pid,
                peer.uid,
                peer.gid
            );
            return;
        }

        if let Err(e) = self.transact(&connector, timeout) {
            warn!("{}: transaction aborted: {}", self.listener.endpoint(), e);
        }
    }

    fn transact(&mut self, connector: &Connector, timeout: Duration) -> io::Result<()> {
        connector.set_timeout(timeout)?;

        match Request::from_size(connector.receive_u32()?) {
            Request::Get => {
                let mut value = vec![0u8; self.parameter.size()];
                self.parameter.read(&mut value);
                connector.send_u32(self.size_field)?;
                connector.send(&value)?;
                debug!("{}: get served", self.listener.endpoint());
            }
            Request::Set(size) => {
                let size = size as usize;
                if size > self.parameter.size().max(MAX_SET_PAYLOAD) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("set of {} bytes announced", size),
                    ));
                }

                let mut data = vec![0u8; size];
                connector.receive(&mut data)?;
                let status = if self.parameter.write(&data) {
                    Status::Success
                } else {
                    Status::Failure
                };
                connector.send_u32(status.code())?;
                debug!("{}: set {:?}", self.listener.endpoint(), status);
            }
        }
        Ok(())
    }
}

struct Dispatcher {
    endpoints: HashMap<RawFd, Endpoint>,
    timeout: Duration,
    access: AccessPolicy,
}

impl EventListener for Dispatcher {
    fn on_event(&mut self, _ctx: &mut ReactorContext, fd: RawFd) -> SetChange {
        match self.endpoints.get_mut(&fd) {
            Some(endpoint) => endpoint.serve(self.timeout, self.access),
            None => warn!("Event on unknown descriptor {}", fd),
        }
        SetChange::Unchanged
    }

    fn on_alarm(&mut self, _ctx: &mut ReactorContext) {
        error!("Server timeout");
    }

    fn on_poll_error(&mut self, _ctx: &mut ReactorContext, error: &io::Error) {
        error!("Server poll error: {}", error);
    }
}

/// Serves registered parameters from a dedicated thread
pub struct ParameterServer {
    namespace: Namespace,
    reactor: Reactor<Dispatcher>,
    names: Vec<String>,
    next_id: ClientId,
}

impl ParameterServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let dispatcher = Dispatcher {
            endpoints: HashMap::new(),
            timeout: config.timeout,
            access: config.access,
        };
        let reactor = Reactor::new(
            dispatcher,
            ReactorConfig {
                name: config.name,
                trace_events: config.trace_events,
            },
        )?;

        Ok(Self {
            namespace: config.namespace,
            reactor,
            names: Vec::new(),
            next_id: 0,
        })
    }

    /// Register `parameter` and open its endpoint. Only while stopped.
    pub fn add_parameter<P: RemoteParameter>(&mut self, parameter: P) -> Result<()> {
        self.add_boxed(Box::new(parameter))
    }

    pub fn add_boxed(&mut self, parameter: Box<dyn RemoteParameter>) -> Result<()> {
        if self.reactor.is_started() {
            return Err(Error::ServerRunning);
        }

        let name = parameter.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidParameter {
                name,
                reason: "empty name".to_string(),
            });
        }
        if self.names.contains(&name) {
            return Err(Error::DuplicateName(name));
        }

        let size = parameter.size();
        let size_field = match u32::try_from(size) {
            Ok(0) => {
                return Err(Error::InvalidParameter {
                    name,
                    reason: "zero size".to_string(),
                })
            }
            Ok(size_field) => size_field,
            Err(_) => {
                return Err(Error::InvalidParameter {
                    name,
                    reason: format!("{} bytes do not fit the size field", size),
                })
            }
        };

        let endpoint_name = protocol::endpoint_name(&name);
        let listener =
            Listener::bind(&self.namespace, &endpoint_name).map_err(|source| Error::Listen {
                endpoint: self.namespace.describe(&endpoint_name),
                source,
            })?;
        let credentials = listener.credentials().map_err(Error::Credentials)?;
        let poll_fd = listener.try_clone_fd()?;
        let raw = poll_fd.as_raw_fd();

        let id = self.next_id;
        self.reactor.with_context(|ctx, dispatcher| {
            ctx.register(id, poll_fd, true)?;
            dispatcher.endpoints.insert(
                raw,
                Endpoint {
                    listener,
                    credentials,
                    parameter,
                    size_field,
                },
            );
            Ok::<_, Error>(())
        })?;

        info!("Parameter {} ({} bytes) registered", name, size);
        self.next_id += 1;
        self.names.push(name);
        Ok(())
    }

    /// Registered parameter names, in registration order
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn start(&mut self) -> Result<()> {
        self.reactor.start()?;
        info!("Parameter server started with {} parameters", self.names.len());
        Ok(())
    }

    /// Stop serving. Endpoints stay bound so the server can be restarted.
    pub fn stop(&mut self) {
        if self.reactor.is_started() {
            self.reactor.stop();
            info!("Parameter server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::COMMAND_GET;
    use crate::TypedParameter;
    use tempfile::tempdir;

    const SERVER: Credentials = Credentials {
        pid: 100,
        uid: 1000,
        gid: 1005,
    };

    fn peer(uid: u32, gid: u32) -> Credentials {
        Credentials { pid: 200, uid, gid }
    }

    #[test]
    fn test_same_group_policy() {
        let policy = AccessPolicy::default();
        assert_eq!(policy, AccessPolicy::SameGroup);
        assert!(policy.allows(&SERVER, &peer(0, 1005)));
        assert!(!policy.allows(&SERVER, &peer(1000, 0)));
    }

    #[test]
    fn test_same_user_policies() {
        assert!(AccessPolicy::SameUser.allows(&SERVER, &peer(1000, 0)));
        assert!(!AccessPolicy::SameUser.allows(&SERVER, &peer(0, 1005)));

        let strict = AccessPolicy::SameUserAndGroup;
        assert!(strict.allows(&SERVER, &peer(1000, 1005)));
        assert!(!strict.allows(&SERVER, &peer(1000, 0)));
        assert!(!strict.allows(&SERVER, &peer(0, 1005)));
    }

    #[test]
    fn test_rejects_unusable_parameters() {
        let mut server = ParameterServer::new(ServerConfig::default()).unwrap();

        let nameless = crate::BytesParameter::new("", 4);
        assert!(matches!(
            server.add_parameter(nameless),
            Err(Error::InvalidParameter { .. })
        ));

        let empty = crate::BytesParameter::new("empty", 0);
        assert!(matches!(
            server.add_parameter(empty),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(server.parameter_names().is_empty());
    }

    #[test]
    fn test_foreign_group_never_answered() {
        let dir = tempdir().unwrap();
        let namespace = Namespace::Directory(dir.path().to_path_buf());
        let listener = Listener::bind(&namespace, "parameter.volume").unwrap();
        let own = listener.credentials().unwrap();

        let volume = TypedParameter::new("volume", 40u32);
        let handle = volume.handle();
        let mut endpoint = Endpoint {
            listener,
            credentials: Credentials {
                gid: own.gid.wrapping_add(1),
                ..own
            },
            parameter: Box::new(volume),
            size_field: 4,
        };

        let set = [4u32.to_ne_bytes(), 9u32.to_ne_bytes()].concat();
        let requests = [COMMAND_GET.to_ne_bytes().to_vec(), set];
        for request in &requests {
            let client = Connector::connect(&namespace, "parameter.volume").unwrap();
            client.set_timeout(Duration::from_secs(2)).unwrap();
            client.send(request).unwrap();

            endpoint.serve(Duration::from_secs(2), AccessPolicy::SameGroup);

            // Closed without a byte written; unread request data turns EOF into a reset
            let err = client.receive_u32().unwrap_err();
            assert!(
                matches!(
                    err.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
                ),
                "unexpected {:?}",
                err
            );
        }
        assert_eq!(handle.get(), 40);
    }
}
