//! Command line flags of the `echo_server` and `echo_client` binaries

use crate::client::{ChannelOptions, ConnectionType};
use crate::network::Address;
use crate::protocol::Protocol;
use crate::server::ServerOptions;
use crate::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "echo_client", version = env!("CARGO_PKG_VERSION"), about = "Sends echo requests to an echo server")]
pub struct ClientArgs {
    /// Carry this along with requests
    #[structopt(long, default_value = "")]
    pub attachment: String,

    /// Protocol type: std (alias baidu_std) or http
    #[structopt(long, default_value = "std")]
    pub protocol: String,

    /// Connection type: single, pooled or short; empty picks the protocol's default
    #[structopt(long, default_value = "")]
    pub connection_type: String,

    /// IP address, unix:/path, list://a,b or file://path of servers
    #[structopt(long, default_value = "0.0.0.0:8000")]
    pub server: String,

    /// Name of the load balancer: rr or random
    #[structopt(long, default_value = "")]
    pub load_balancer: String,

    /// RPC timeout in milliseconds; negative waits forever
    #[structopt(long, default_value = "100", allow_hyphen_values = true)]
    pub timeout_ms: i64,

    /// Max retries (not including the first RPC)
    #[structopt(long, default_value = "3")]
    pub max_retry: u32,

    /// Milliseconds between consecutive requests
    #[structopt(long, default_value = "1000")]
    pub interval_ms: u64,
}

impl ClientArgs {
    /// Channel settings described by the flags
    pub fn channel_options(&self) -> Result<ChannelOptions> {
        let protocol: Protocol = self.protocol.parse()?;
        let connection_type = ConnectionType::parse_optional(&self.connection_type)?;
        let timeout = u64::try_from(self.timeout_ms).ok().map(Duration::from_millis);

        let options = ChannelOptions::default()
            .with_protocol(protocol)
            .with_connection_type(connection_type)
            .with_timeout(timeout)
            .with_max_retry(self.max_retry);
        options.validate()?;
        Ok(options)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "echo_server", version = env!("CARGO_PKG_VERSION"), about = "Answers echo requests")]
pub struct ServerArgs {
    /// Do not send the request attachment back with the response
    #[structopt(long)]
    pub no_echo_attachment: bool,

    /// TCP port of this server
    #[structopt(long, default_value = "8000")]
    pub port: u16,

    /// Server listen address, may be IPv4, IPv6 or unix:/path; overrides --port
    #[structopt(long, default_value = "")]
    pub listen_addr: String,

    /// Connections without data transmission for this many seconds are
    /// closed; zero or negative disables the check
    #[structopt(long, default_value = "-1", allow_hyphen_values = true)]
    pub idle_timeout_s: i64,

    /// Milliseconds to wait for clients to disconnect on shutdown
    #[structopt(long, default_value = "2000")]
    pub logoff_ms: u64,
}

impl ServerArgs {
    pub fn echo_attachment(&self) -> bool {
        !self.no_echo_attachment
    }

    /// Address to listen on
    pub fn listen_address(&self) -> Result<Address> {
        let listen_addr = self.listen_addr.trim();
        if listen_addr.is_empty() {
            return Ok(Address::Network(SocketAddr::from((
                Ipv4Addr::UNSPECIFIED,
                self.port,
            ))));
        }
        listen_addr.parse()
    }

    pub fn server_options(&self) -> ServerOptions {
        let idle_timeout = u64::try_from(self.idle_timeout_s)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        ServerOptions::default()
            .with_idle_timeout(idle_timeout)
            .with_logoff(Duration::from_millis(self.logoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcError;

    #[test]
    fn test_client_defaults() {
        let args = ClientArgs::from_iter(["echo_client"]);
        assert_eq!(args.server, "0.0.0.0:8000");
        assert_eq!(args.attachment, "");
        assert_eq!(args.interval(), Duration::from_secs(1));

        let options = args.channel_options().unwrap();
        assert_eq!(options.protocol, Protocol::Std);
        assert_eq!(options.effective_connection_type(), ConnectionType::Single);
        assert_eq!(options.timeout, Some(Duration::from_millis(100)));
        assert_eq!(options.max_retry, 3);
    }

    #[test]
    fn test_client_flags() {
        let args = ClientArgs::from_iter([
            "echo_client",
            "--protocol",
            "http",
            "--connection-type",
            "short",
            "--timeout-ms",
            "-1",
            "--attachment",
            "foo",
            "--server",
            "list://127.0.0.1:8000,127.0.0.1:8001",
            "--load-balancer",
            "rr",
        ]);
        let options = args.channel_options().unwrap();
        assert_eq!(options.protocol, Protocol::Http);
        assert_eq!(options.effective_connection_type(), ConnectionType::Short);
        assert_eq!(options.timeout, None);
        assert_eq!(args.attachment, "foo");
    }

    #[test]
    fn test_client_accepts_baidu_std() {
        let args = ClientArgs::from_iter(["echo_client", "--protocol", "baidu_std"]);
        let options = args.channel_options().unwrap();
        assert_eq!(options.protocol, Protocol::Std);
        assert_eq!(options.effective_connection_type(), ConnectionType::Single);
    }

    #[test]
    fn test_client_rejects_bad_values() {
        let args = ClientArgs::from_iter(["echo_client", "--protocol", "thrift"]);
        assert!(matches!(args.channel_options(), Err(RpcError::Config(_))));

        let args = ClientArgs::from_iter([
            "echo_client",
            "--protocol",
            "http",
            "--connection-type",
            "single",
        ]);
        assert!(matches!(args.channel_options(), Err(RpcError::Config(_))));
    }

    #[test]
    fn test_server_defaults() {
        let args = ServerArgs::from_iter(["echo_server"]);
        assert!(args.echo_attachment());
        assert_eq!(
            args.listen_address().unwrap(),
            "0.0.0.0:8000".parse::<Address>().unwrap()
        );

        let options = args.server_options();
        assert_eq!(options.idle_timeout, None);
        assert_eq!(options.logoff, Duration::from_millis(2000));
    }

    #[test]
    fn test_server_flags() {
        let args = ServerArgs::from_iter([
            "echo_server",
            "--no-echo-attachment",
            "--port",
            "9000",
            "--listen-addr",
            "unix:/tmp/echo.sock",
            "--idle-timeout-s",
            "30",
        ]);
        assert!(!args.echo_attachment());
        assert!(args.listen_address().unwrap().is_unix());
        assert_eq!(args.server_options().idle_timeout, Some(Duration::from_secs(30)));

        let args = ServerArgs::from_iter(["echo_server", "--idle-timeout-s", "0"]);
        assert_eq!(args.server_options().idle_timeout, None);
    }

    #[test]
    fn test_server_rejects_bad_listen_addr() {
        let args = ServerArgs::from_iter(["echo_server", "--listen-addr", "not-an-address"]);
        assert!(matches!(args.listen_address(), Err(RpcError::Config(_))));
    }
}
