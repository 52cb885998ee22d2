use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Upper bound for a single connection attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Returns `true` if something accepts TCP connections on `localhost:port`.
///
/// Refused connections, timeouts and any other connect error all report the port as free.
pub async fn is_port_bound(port: u16) -> bool {
    match timeout(PROBE_TIMEOUT, TcpStream::connect(("localhost", port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            trace!(port, error = %err, "port probe connect failed");
            false
        }
        Err(_) => {
            trace!(port, "port probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn listening_port_is_bound() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_bound(port).await);
    }

    #[tokio::test]
    async fn released_port_is_free() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!is_port_bound(port).await);
    }
}
