//! Probe utilities.

use std::time::Duration;
use tokio::net::TcpStream;

/// Returns true if a TCP connection to `addr` succeeds within `timeout`.
pub async fn check_tcp(addr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_a_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(check_tcp(&addr.to_string(), Duration::from_secs(1)).await);

        drop(listener);
        assert!(!check_tcp(&addr.to_string(), Duration::from_millis(200)).await);
    }
}
