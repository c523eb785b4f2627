//! The `serveapi` and `acceptconnections` commands.

use std::fs;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use dockyard_config::{SocketEndpoint, default_socket_group};
use dockyard_engine::{Engine, EngineError, Env, HandlerError, Job, STATUS_FAILED};
use nix::unistd::{Group, chown};
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandler, ConnectionStream, read_request_line};
use super::gate::{Gate, Readiness};
use super::listener::{ListenerHandle, SocketListener};
use super::request::ApiRequest;
use super::response::{ResponseWriter, StreamTarget};
use super::tls::{TlsAcceptor, TlsMaterial};
use super::{API_HOOK, API_TARGET, ACCEPT_CONNECTIONS_COMMAND, ApiError, SERVE_API_COMMAND};

/// Settings `serveapi` reads from its job variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    /// Log every request with its exit status.
    pub logging: bool,
    /// Allow cross-origin browser clients.
    pub enable_cors: bool,
    /// Version string reported by the server.
    pub version: String,
    /// Group given ownership of unix sockets.
    pub socket_group: String,
    /// Hold connections until `acceptconnections`.
    pub buffer_requests: bool,
    /// TLS material when TLS is enabled.
    pub tls: Option<TlsMaterial>,
}

impl ServeOptions {
    /// Reads the options from `serveapi` job variables.
    #[must_use]
    pub fn from_env(env: &Env) -> Self {
        let verify = env.get_bool("TlsVerify");
        let tls = (env.get_bool("Tls") || verify).then(|| TlsMaterial {
            verify,
            ca: env.get_or_empty("TlsCa").into(),
            cert: env.get_or_empty("TlsCert").into(),
            key: env.get_or_empty("TlsKey").into(),
        });
        Self {
            logging: env.get_bool("Logging"),
            enable_cors: env.get_bool("EnableCors"),
            version: env.get_or_empty("Version").to_owned(),
            socket_group: env.get_or_empty("SocketGroup").to_owned(),
            buffer_requests: env.get_bool("BufferRequests"),
            tls,
        }
    }
}

#[derive(Debug, Default)]
enum ServeState {
    #[default]
    Idle,
    Serving {
        listeners: Vec<ListenerHandle>,
        bound: Vec<BoundEndpoint>,
        options: ServeOptions,
    },
    Stopped,
}

/// An endpoint the API is listening on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundEndpoint {
    /// Endpoint as configured.
    pub endpoint: SocketEndpoint,
    /// Resolved TCP address, when the endpoint is TCP.
    pub local_addr: Option<SocketAddr>,
}

pub(crate) struct ApiServer {
    readiness: Readiness,
    tls: Option<Arc<dyn TlsAcceptor>>,
    gate: Arc<Gate>,
    state: Mutex<ServeState>,
}

/// Observer handle onto the API subsystem.
#[derive(Clone)]
pub struct ApiHandle {
    server: Arc<ApiServer>,
}

impl ApiHandle {
    /// How many times `acceptconnections` opened the gate; never above one.
    #[must_use]
    pub fn activation_count(&self) -> usize {
        self.server.gate.activations()
    }

    /// Whether listeners are accepting connections.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.server.gate.is_open()
    }

    /// Endpoints bound by `serveapi`; empty before it runs and after teardown.
    #[must_use]
    pub fn endpoints(&self) -> Vec<BoundEndpoint> {
        match self.server.lock() {
            Ok(state) => match &*state {
                ServeState::Serving { bound, .. } => bound.clone(),
                ServeState::Idle | ServeState::Stopped => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    /// Options `serveapi` ran with.
    #[must_use]
    pub fn options(&self) -> Option<ServeOptions> {
        match &*self.server.lock().ok()? {
            ServeState::Serving { options, .. } => Some(options.clone()),
            ServeState::Idle | ServeState::Stopped => None,
        }
    }
}

/// Binds `serveapi` and `acceptconnections`.
///
/// `readiness` is the flag the daemon sets once its commands are installed;
/// `tls` terminates TLS when `serveapi` is asked for it.
///
/// # Errors
///
/// Fails when either command name is taken.
pub fn register(
    engine: &Engine,
    readiness: Readiness,
    tls: Option<Arc<dyn TlsAcceptor>>,
) -> Result<ApiHandle, EngineError> {
    let server = Arc::new(ApiServer {
        readiness,
        tls,
        gate: Arc::new(Gate::default()),
        state: Mutex::new(ServeState::Idle),
    });

    let bound = Arc::clone(&server);
    engine.register(
        SERVE_API_COMMAND,
        move |job: &mut Job| -> Result<(), HandlerError> {
            bound.serve(job).map_err(|error| api_failure(&error))
        },
    )?;
    let bound = Arc::clone(&server);
    engine.register(
        ACCEPT_CONNECTIONS_COMMAND,
        move |job: &mut Job| -> Result<(), HandlerError> {
            bound.accept(job).map_err(|error| api_failure(&error))
        },
    )?;
    Ok(ApiHandle { server })
}

fn api_failure(error: &ApiError) -> HandlerError {
    HandlerError::new(error.to_string())
}

impl ApiServer {
    fn lock(&self) -> Result<MutexGuard<'_, ServeState>, ApiError> {
        self.state.lock().map_err(|_| ApiError::poisoned("API state"))
    }

    fn serve(self: &Arc<Self>, job: &mut Job) -> Result<(), ApiError> {
        let mut state = self.lock()?;
        if !matches!(*state, ServeState::Idle) {
            return Err(ApiError::AlreadyServing);
        }

        let endpoints = parse_hosts(job.args())?;
        let options = ServeOptions::from_env(job.env());
        if let Some(material) = &options.tls {
            if self.tls.is_none() {
                return Err(ApiError::TlsUnavailable);
            }
            material.ensure_present()?;
        }

        let engine = job.engine().clone();
        let server = Arc::clone(self);
        engine
            .on_shutdown(API_HOOK, move || server.stop())
            .map_err(|error| ApiError::Internal {
                message: error.to_string(),
            })?;

        let mut sockets = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let listener = SocketListener::bind(endpoint)?;
            if let Some(path) = endpoint.unix_path() {
                apply_socket_permissions(path, &options.socket_group)?;
            }
            sockets.push(listener);
        }

        let handler: Arc<dyn ConnectionHandler> = Arc::new(ApiConnectionHandler {
            engine,
            logging: options.logging,
            tls: options.tls.clone().zip(self.tls.clone()),
        });
        let mut bound = Vec::with_capacity(sockets.len());
        let mut listeners = Vec::with_capacity(sockets.len());
        for socket in sockets {
            bound.push(BoundEndpoint {
                endpoint: socket.endpoint().clone(),
                local_addr: socket.local_addr(),
            });
            listeners.push(socket.start(Arc::clone(&handler), Arc::clone(&self.gate))?);
        }

        info!(
            target: API_TARGET,
            endpoints = ?bound.iter().map(|bound| bound.endpoint.to_string()).collect::<Vec<_>>(),
            tls = options.tls.is_some(),
            cors = options.enable_cors,
            version = %options.version,
            buffered = options.buffer_requests,
            "API listeners started"
        );
        if !options.buffer_requests {
            self.gate.open();
        }
        *state = ServeState::Serving {
            listeners,
            bound,
            options,
        };
        Ok(())
    }

    fn accept(&self, job: &mut Job) -> Result<(), ApiError> {
        if !self.readiness.is_ready() {
            return Err(ApiError::NotReady);
        }
        if !matches!(*self.lock()?, ServeState::Serving { .. }) {
            return Err(ApiError::NotServing);
        }
        if self.gate.open() {
            info!(target: API_TARGET, "API accepting connections");
            job.write_stdout("accepting connections");
        } else {
            debug!(target: API_TARGET, "acceptconnections repeated; already accepting");
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), HandlerError> {
        let previous = {
            let mut state = self.lock().map_err(|error| api_failure(&error))?;
            std::mem::replace(&mut *state, ServeState::Stopped)
        };
        let ServeState::Serving { listeners, .. } = previous else {
            return Ok(());
        };
        for listener in &listeners {
            listener.shutdown();
        }
        let mut panicked = 0_usize;
        for listener in listeners {
            if let Err(error) = listener.join() {
                warn!(target: API_TARGET, error = %error, "API listener failed");
                panicked += 1;
            }
        }
        info!(target: API_TARGET, "API listeners stopped");
        if panicked == 0 {
            Ok(())
        } else {
            Err(HandlerError::new(format!("{panicked} API listener(s) panicked")))
        }
    }
}

fn parse_hosts(args: &[String]) -> Result<Vec<SocketEndpoint>, ApiError> {
    if args.is_empty() {
        return Err(ApiError::NoHosts);
    }
    args.iter()
        .map(|raw| {
            raw.parse().map_err(|source| ApiError::InvalidHost {
                value: raw.clone(),
                source,
            })
        })
        .collect()
}

/// Gives the socket group ownership and `0660` permissions.
///
/// A missing group is only an error when it was configured explicitly.
fn apply_socket_permissions(path: &Utf8Path, group: &str) -> Result<(), ApiError> {
    if !group.is_empty() {
        match Group::from_name(group) {
            Ok(Some(found)) => {
                chown(path.as_std_path(), None, Some(found.gid)).map_err(|source| {
                    ApiError::SocketOwnership {
                        group: group.to_owned(),
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
            }
            Ok(None) if group == default_socket_group() => {
                debug!(target: API_TARGET, group, "default socket group absent; skipping chown");
            }
            Ok(None) => {
                return Err(ApiError::UnknownGroup {
                    group: group.to_owned(),
                });
            }
            Err(source) => {
                return Err(ApiError::SocketOwnership {
                    group: group.to_owned(),
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    fs::set_permissions(path, fs::Permissions::from_mode(0o660)).map_err(|source| {
        ApiError::SocketMode {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Runs one request per connection through the kernel.
struct ApiConnectionHandler {
    engine: Engine,
    logging: bool,
    tls: Option<(TlsMaterial, Arc<dyn TlsAcceptor>)>,
}

impl ApiConnectionHandler {
    fn terminate_tls(&self, stream: ConnectionStream) -> std::io::Result<ConnectionStream> {
        match (stream, &self.tls) {
            (ConnectionStream::Tcp(tcp), Some((material, acceptor))) => {
                acceptor.accept(tcp, material).map(ConnectionStream::Tls)
            }
            (stream, _) => Ok(stream),
        }
    }

    fn serve_request(&self, stream: &mut ConnectionStream) -> std::io::Result<()> {
        let Some(line) = read_request_line(stream)? else {
            return Ok(());
        };
        let mut writer = ResponseWriter::new(stream);
        let request = match ApiRequest::parse(&line) {
            Ok(request) => request,
            Err(error) => {
                return writer.write_error(&format!("invalid request: {error}"), STATUS_FAILED);
            }
        };

        let mut job = self.engine.job(request.command, request.args);
        for (key, value) in request.env.iter() {
            job.setenv(key, value);
        }
        let outcome = job.run();
        let status = job.status().unwrap_or(STATUS_FAILED);
        if self.logging {
            info!(target: API_TARGET, command = job.name(), status, "API request");
        }

        writer.write_stream(StreamTarget::Stdout, &job.stdout_text())?;
        writer.write_stream(StreamTarget::Stderr, &job.stderr_text())?;
        if let Err(error) = outcome {
            writer.write_stream(StreamTarget::Stderr, &format!("error: {error}\n"))?;
        }
        writer.write_exit(status)
    }
}

impl ConnectionHandler for ApiConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let mut stream = match self.terminate_tls(stream) {
            Ok(stream) => stream,
            Err(error) => {
                warn!(target: API_TARGET, error = %error, "TLS handshake failed");
                return;
            }
        };
        if let Err(error) = self.serve_request(&mut stream) {
            warn!(target: API_TARGET, error = %error, "API connection error");
        }
    }
}
