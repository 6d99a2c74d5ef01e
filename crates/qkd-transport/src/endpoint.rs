use qkd_core::error::{QkdError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

/// A stream endpoint identifies where a pipeline stage reads or writes keys
/// and peer messages. Every module in the pipeline is configured with one
/// input and one output endpoint of this kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    Stdin,
    Stdout,
    /// Unix domain socket, used for same-host inter-process pipelines.
    Ipc(PathBuf),
    Tcp(SocketAddr),
}

impl EndpointSpec {
    pub fn parse(url: &str) -> Result<Self> {
        if url == "stdin://" || url == "stdin:" {
            return Ok(EndpointSpec::Stdin);
        }
        if url == "stdout://" || url == "stdout:" {
            return Ok(EndpointSpec::Stdout);
        }
        if let Some(path) = url.strip_prefix("ipc://") {
            return Ok(EndpointSpec::Ipc(PathBuf::from(path)));
        }
        if let Some(addr) = url.strip_prefix("tcp://") {
            let socket_addr: SocketAddr = addr
                .parse()
                .map_err(|_| QkdError::Other(format!("malformed tcp endpoint: {url}")))?;
            return Ok(EndpointSpec::Tcp(socket_addr));
        }
        Err(QkdError::UnsupportedScheme(url.to_string()))
    }
}
