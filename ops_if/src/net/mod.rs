//! # Network Module
//!
//! Networking abstractions over ZMQ, the message transport chosen for the
//! software. The operator link is a pair of sockets: a REP socket accepting
//! JSON-framed operator messages, and a PUB socket fanning telemetry and
//! video events out to every connected subscriber.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use zmq::{Context, Socket, SocketType};

// Export zmq
pub use zmq;

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Options applied to a socket when it is opened.
///
/// Timeouts are in milliseconds; a value of -1 blocks forever.
pub struct SocketOptions {
    /// If true the socket binds to the endpoint rather than connecting to
    /// it. Servers should set this to `true`.
    pub bind: bool,

    /// `ZMQ_LINGER`: linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RCVTIMEO`: maximum time before a recv operation returns EAGAIN
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: maximum time before a send operation returns EAGAIN
    pub send_timeout: i32,

    /// `ZMQ_CONNECT_TIMEOUT`: timeout for `connect()`
    pub connect_timeout: i32,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(&'static str, zmq::Error),

    #[error("Could not bind/connect the socket to {0}: {1}")]
    EndpointError(String, zmq::Error),
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl SocketOptions {
    /// Apply these options to the given socket.
    pub fn apply(&self, socket: &Socket) -> Result<(), NetError> {
        socket
            .set_linger(self.linger)
            .map_err(|e| NetError::SocketOptionError("linger", e))?;
        socket
            .set_rcvtimeo(self.recv_timeout)
            .map_err(|e| NetError::SocketOptionError("rcvtimeo", e))?;
        socket
            .set_sndtimeo(self.send_timeout)
            .map_err(|e| NetError::SocketOptionError("sndtimeo", e))?;
        socket
            .set_connect_timeout(self.connect_timeout)
            .map_err(|e| NetError::SocketOptionError("connect_timeout", e))?;

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind: false,
            linger: 100,
            recv_timeout: -1,
            send_timeout: -1,
            connect_timeout: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Open a socket of the given type on the given endpoint.
///
/// The socket is bound or connected according to `options.bind`.
pub fn open_socket(
    ctx: &Context,
    socket_type: SocketType,
    options: &SocketOptions,
    endpoint: &str,
) -> Result<Socket, NetError> {
    let socket = ctx
        .socket(socket_type)
        .map_err(NetError::CreateSocketError)?;

    options.apply(&socket)?;

    match options.bind {
        true => socket.bind(endpoint),
        false => socket.connect(endpoint),
    }
    .map_err(|e| NetError::EndpointError(endpoint.into(), e))?;

    Ok(socket)
}
