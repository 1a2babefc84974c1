use psk_server::{Poller, Readiness, ReadinessPoll};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

#[test]
fn idle_socket_times_out() {
    let (_client, server) = socket_pair();
    let mut poller = Poller::new(server.as_raw_fd()).unwrap();
    assert_eq!(poller.fd(), server.as_raw_fd());

    let start = Instant::now();
    let readiness = poller.wait(Duration::from_millis(100)).unwrap();

    assert_eq!(readiness, Readiness::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(90));
}

#[test]
fn incoming_data_is_readable() {
    let (mut client, mut server) = socket_pair();
    let mut poller = Poller::new(server.as_raw_fd()).unwrap();

    client.write_all(b"ping").unwrap();
    assert_eq!(
        poller.wait(Duration::from_secs(5)).unwrap(),
        Readiness::Readable
    );

    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
}

#[test]
fn peer_close_is_readable() {
    let (client, server) = socket_pair();
    let mut poller = Poller::new(server.as_raw_fd()).unwrap();

    drop(client);

    assert_eq!(
        poller.wait(Duration::from_secs(5)).unwrap(),
        Readiness::Readable
    );
}

#[test]
fn reset_peer_reports_pending_error() {
    let (client, server) = socket_pair();
    let mut poller = Poller::new(server.as_raw_fd()).unwrap();

    // Zero linger turns the close into a reset.
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    let ret = unsafe {
        libc::setsockopt(
            client.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    assert_eq!(ret, 0);
    drop(client);

    assert_eq!(
        poller.wait(Duration::from_secs(5)).unwrap(),
        Readiness::ErrorPending
    );
}
