//! End-to-end scenarios: a real client socket talking the encrypted wire
//! protocol to a real listener, relaying to a real "destination" socket, no
//! mocked I/O anywhere in the path.

use ssrelay::cipher::{self, CipherConfig, CipherMethod};
use ssrelay::config::Config;
use ssrelay::pair;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const PASSWORD: &str = "correct horse battery staple";

fn test_cipher_config() -> Arc<CipherConfig> {
    Arc::new(CipherConfig::new(PASSWORD, CipherMethod::Rc4))
}

/// Starts the relay against an ephemeral port and returns its address.
/// Accepts connections forever in the background, exactly like the real
/// listener, but without going through `config::Config::load`/CLI parsing.
async fn start_relay(cipher_config: Arc<CipherConfig>, timeout_secs: u64) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Arc::new(Config {
        server_host: vec![],
        server_port: addr.port(),
        password: PASSWORD.to_string(),
        method: CipherMethod::Rc4,
        timeout: timeout_secs,
        pid_file: None,
        verbose: false,
    });

    tokio::spawn(async move {
        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };
            let config = config.clone();
            let cipher_config = cipher_config.clone();
            tokio::spawn(async move {
                pair::run(socket, peer_addr, config, cipher_config).await;
            });
        }
    });

    addr
}

/// Builds an IPv4 handshake header naming `dest`, followed by `payload`,
/// already encrypted as the client side of the connection would send it.
fn encrypted_ipv4_request(
    dest: SocketAddr,
    payload: &[u8],
    send_ctx: &mut Option<cipher::CipherContext>,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(1u8); // ATYP_IPV4
    let SocketAddr::V4(v4) = dest else {
        panic!("test destination must be ipv4");
    };
    buf.extend_from_slice(&v4.ip().octets());
    buf.extend_from_slice(&v4.port().to_be_bytes());
    buf.extend_from_slice(payload);
    cipher::encrypt(&mut buf, send_ctx.as_mut());
    buf
}

async fn spawn_echo_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    addr
}

#[tokio::test]
async fn ipv4_handshake_round_trips_payload() {
    let destination = spawn_echo_destination().await;
    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 5).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, mut recv_ctx) = cipher_config.new_context_pair();

    let request = encrypted_ipv4_request(destination, b"GET / HTTP/1.0\r\n\r\n", &mut send_ctx);
    client.write_all(&request).await.unwrap();

    let mut response = vec![0u8; b"GET / HTTP/1.0\r\n\r\n".len()];
    client.read_exact(&mut response).await.unwrap();
    cipher::decrypt(&mut response, recv_ctx.as_mut());

    assert_eq!(&response, b"GET / HTTP/1.0\r\n\r\n");
}

#[tokio::test]
async fn domain_handshake_resolves_localhost() {
    let destination = spawn_echo_destination().await;
    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 5).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, mut recv_ctx) = cipher_config.new_context_pair();

    let mut request = vec![3u8, 9];
    request.extend_from_slice(b"localhost");
    request.extend_from_slice(&destination.port().to_be_bytes());
    request.extend_from_slice(b"hello");
    cipher::encrypt(&mut request, send_ctx.as_mut());

    client.write_all(&request).await.unwrap();

    let mut response = vec![0u8; b"hello".len()];
    client.read_exact(&mut response).await.unwrap();
    cipher::decrypt(&mut response, recv_ctx.as_mut());

    assert_eq!(&response, b"hello");
}

#[tokio::test]
async fn unsupported_atyp_tears_down_but_listener_keeps_accepting() {
    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 5).await;

    let mut bad_client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, _recv_ctx) = cipher_config.new_context_pair();
    let mut bad_request = vec![2u8, 0, 0, 0];
    cipher::encrypt(&mut bad_request, send_ctx.as_mut());
    bad_client.write_all(&bad_request).await.unwrap();

    // The pair tears itself down; the client observes its side close.
    let mut buf = [0u8; 1];
    let n = bad_client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    // The listener is unaffected: a second, well-formed connection still works.
    let destination = spawn_echo_destination().await;
    let mut good_client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut good_send, mut good_recv) = cipher_config.new_context_pair();
    let request = encrypted_ipv4_request(destination, b"ok", &mut good_send);
    good_client.write_all(&request).await.unwrap();

    let mut response = vec![0u8; 2];
    good_client.read_exact(&mut response).await.unwrap();
    cipher::decrypt(&mut response, good_recv.as_mut());
    assert_eq!(&response, b"ok");
}

#[tokio::test]
async fn connect_timeout_tears_down_pair_and_listener_survives() {
    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 1).await;

    // TEST-NET-1 (RFC 5737), never routable: the connect future will hang
    // until our 1-second timeout fires.
    let unroutable: SocketAddr = "192.0.2.1:9".parse().unwrap();
    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, _recv_ctx) = cipher_config.new_context_pair();
    let request = encrypted_ipv4_request(unroutable, b"", &mut send_ctx);
    client.write_all(&request).await.unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf)).await;
    assert_eq!(read.unwrap().unwrap(), 0);

    // Listener still accepts new connections afterwards.
    let destination = spawn_echo_destination().await;
    let mut good_client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut good_send, mut good_recv) = cipher_config.new_context_pair();
    let request = encrypted_ipv4_request(destination, b"still alive", &mut good_send);
    good_client.write_all(&request).await.unwrap();

    let mut response = vec![0u8; b"still alive".len()];
    good_client.read_exact(&mut response).await.unwrap();
    cipher::decrypt(&mut response, good_recv.as_mut());
    assert_eq!(&response, b"still alive");
}

#[tokio::test]
async fn peer_eof_delivers_exactly_what_was_written_then_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let destination_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"OK").await;
            // Drop closes the socket: half-close from the destination side.
        }
    });

    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 5).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, mut recv_ctx) = cipher_config.new_context_pair();
    let request = encrypted_ipv4_request(destination_addr, b"", &mut send_ctx);
    client.write_all(&request).await.unwrap();

    let mut response = vec![0u8; 2];
    client.read_exact(&mut response).await.unwrap();
    cipher::decrypt(&mut response, recv_ctx.as_mut());
    assert_eq!(&response, b"OK");

    // Nothing more arrives, and the client's side eventually sees EOF too.
    let mut trailing = [0u8; 1];
    let n = client.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn backpressure_never_drops_bytes_against_a_slow_destination() {
    const PAYLOAD_LEN: usize = 3 * pair::BUF_SIZE;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let destination_addr = listener.local_addr().unwrap();
    let destination_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut total = 0usize;
        let mut chunk = vec![0u8; 256];
        while total < PAYLOAD_LEN {
            // Deliberately slow: a short sleep between reads models a
            // write-stalled destination without needing real rate limiting.
            tokio::time::sleep(Duration::from_millis(1)).await;
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    });

    let cipher_config = test_cipher_config();
    let relay_addr = start_relay(cipher_config.clone(), 10).await;

    let mut client = TcpStream::connect(relay_addr).await.unwrap();
    let (mut send_ctx, _recv_ctx) = cipher_config.new_context_pair();

    let payload = vec![0x42u8; PAYLOAD_LEN];
    let request = encrypted_ipv4_request(destination_addr, &payload, &mut send_ctx);
    client.write_all(&request).await.unwrap();

    let total_received = tokio::time::timeout(Duration::from_secs(30), destination_task)
        .await
        .expect("destination task timed out")
        .expect("destination task panicked");
    assert_eq!(total_received, PAYLOAD_LEN);
}
