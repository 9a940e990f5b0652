use super::connection::{ClientSocket, MuxConnection};
use super::{ChannelOptions, ConnectionType};
use crate::network::Address;
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands out sockets to servers according to the channel's connection type
pub(crate) struct SocketMap {
    options: ChannelOptions,
    connection_type: ConnectionType,
    single: Mutex<HashMap<Address, Arc<MuxConnection>>>,
    pooled: Mutex<HashMap<Address, Vec<ClientSocket>>>,
}

impl SocketMap {
    pub fn new(options: ChannelOptions) -> Self {
        let connection_type = options.effective_connection_type();
        Self {
            options,
            connection_type,
            single: Mutex::new(HashMap::new()),
            pooled: Mutex::new(HashMap::new()),
        }
    }

    /// Gets a socket for one call to `address`
    pub async fn checkout(&self, address: &Address) -> Result<ClientSocket> {
        match self.connection_type {
            ConnectionType::Single => {
                {
                    let mut single = lock(&self.single);
                    match single.get(address) {
                        Some(conn) if !conn.is_broken() => {
                            return Ok(ClientSocket::Std(Arc::clone(conn)));
                        }
                        // Closes the old connection once in-flight calls finish.
                        Some(_) => {
                            single.remove(address);
                        }
                        None => {}
                    }
                }

                let conn = Arc::new(MuxConnection::connect(address, &self.options).await?);
                let mut single = lock(&self.single);
                // Another call may have reconnected while this one was connecting.
                match single.get(address) {
                    Some(current) if !current.is_broken() => {
                        Ok(ClientSocket::Std(Arc::clone(current)))
                    }
                    _ => {
                        single.insert(address.clone(), Arc::clone(&conn));
                        Ok(ClientSocket::Std(conn))
                    }
                }
            }
            ConnectionType::Pooled => {
                let idle = {
                    let mut pooled = lock(&self.pooled);
                    let sockets = pooled.entry(address.clone()).or_default();
                    let mut found = None;
                    while let Some(socket) = sockets.pop() {
                        if !socket.is_broken() {
                            found = Some(socket);
                            break;
                        }
                    }
                    found
                };
                match idle {
                    Some(socket) => Ok(socket),
                    None => ClientSocket::connect(address, &self.options).await,
                }
            }
            ConnectionType::Short => ClientSocket::connect(address, &self.options).await,
        }
    }

    /// Returns a socket after a completed call
    ///
    /// Only pooled sockets are kept, and only while healthy and below the
    /// pool size. Everything else is closed by dropping it.
    pub fn checkin(&self, address: &Address, socket: ClientSocket) {
        if self.connection_type != ConnectionType::Pooled || socket.is_broken() {
            return;
        }
        let mut pooled = lock(&self.pooled);
        let sockets = pooled.entry(address.clone()).or_default();
        if sockets.len() < self.options.max_pool_size {
            sockets.push(socket);
        } else {
            debug!(server = %address, "Pool is full, closing connection");
        }
    }

    #[cfg(test)]
    pub fn idle_count(&self, address: &Address) -> usize {
        lock(&self.pooled).get(address).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Listener;
    use crate::protocol::Protocol;

    async fn idle_listener() -> (Address, tokio::task::JoinHandle<()>) {
        let listener = Listener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = listener.local_address().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (address, handle)
    }

    #[tokio::test]
    async fn test_single_reuses_connection() {
        let (address, _server) = idle_listener().await;
        let map = SocketMap::new(ChannelOptions::default());

        let first = map.checkout(&address).await.unwrap();
        let second = map.checkout(&address).await.unwrap();
        match (first, second) {
            (ClientSocket::Std(a), ClientSocket::Std(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected std sockets"),
        }
    }

    #[tokio::test]
    async fn test_pooled_keeps_returned_sockets() {
        let (address, _server) = idle_listener().await;
        let options = ChannelOptions::default()
            .with_protocol(Protocol::Http)
            .with_max_pool_size(1);
        let map = SocketMap::new(options);

        let a = map.checkout(&address).await.unwrap();
        let b = map.checkout(&address).await.unwrap();
        map.checkin(&address, a);
        map.checkin(&address, b);
        assert_eq!(map.idle_count(&address), 1);

        let _c = map.checkout(&address).await.unwrap();
        assert_eq!(map.idle_count(&address), 0);
    }

    #[tokio::test]
    async fn test_short_never_pools() {
        let (address, _server) = idle_listener().await;
        let options = ChannelOptions::default().with_connection_type(Some(ConnectionType::Short));
        let map = SocketMap::new(options);

        let socket = map.checkout(&address).await.unwrap();
        map.checkin(&address, socket);
        assert_eq!(map.idle_count(&address), 0);
    }
}
