use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use wildlife_watch::{FetchError, FrameSource, SnapshotConfig, SnapshotSource};

type Routes = fn(&str) -> (u16, Vec<u8>);

/// Minimal HTTP/1.1 fixture: one response per connection, then close.
struct Fixture {
    base_url: String,
    requested: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn serve(routes: Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requested = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requested);
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = respond(stream, routes, &log);
            }
        });
        Self {
            base_url,
            requested,
        }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

fn respond(
    mut stream: TcpStream,
    routes: Routes,
    log: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    log.lock().unwrap().push(path.clone());

    let (status, body) = routes(&path);
    let reason = if status == 200 { "OK" } else { "Not Found" };
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    )?;
    stream.write_all(&body)?;
    stream.flush()
}

fn noisy_png() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut img = RgbImage::new(64, 64);
    for px in img.pixels_mut() {
        let mut rgb = [0u8; 3];
        rng.fill_bytes(&mut rgb);
        px.0 = rgb;
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn source() -> SnapshotSource {
    SnapshotSource::new(SnapshotConfig {
        attempt_timeout: Duration::from_secs(2),
        ..SnapshotConfig::default()
    })
}

#[test]
fn all_candidates_404_is_no_reachable_endpoint() {
    let fixture = Fixture::serve(|_| (404, b"missing".to_vec()));
    let err = source().fetch_frame(&fixture.base_url).unwrap_err();
    match err {
        FetchError::NoReachableEndpoint { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        fixture.requested(),
        vec!["/shot.jpg", "/snapshot.jpg", "/image.jpg", "/capture.jpg", "/"]
    );
}

#[test]
fn first_successful_candidate_wins() {
    let fixture = Fixture::serve(|path| match path {
        "/snapshot.jpg" | "/image.jpg" => (200, noisy_png()),
        _ => (404, Vec::new()),
    });
    let frame = source().fetch_frame(&fixture.base_url).expect("frame");
    assert_eq!(frame.source_url, format!("{}/snapshot.jpg", fixture.base_url));
    assert_eq!(frame.bytes(), noisy_png().as_slice());
    assert_eq!(frame.declared_dimensions().unwrap(), (64, 64));
    assert_eq!(frame.declared_channels().unwrap(), 3);
    assert_eq!(fixture.requested(), vec!["/shot.jpg", "/snapshot.jpg"]);
}

#[test]
fn empty_body_falls_through_to_next_candidate() {
    let fixture = Fixture::serve(|path| match path {
        "/shot.jpg" => (200, Vec::new()),
        "/capture.jpg" => (200, noisy_png()),
        _ => (404, Vec::new()),
    });
    let frame = source().fetch_frame(&fixture.base_url).expect("frame");
    assert!(frame.source_url.ends_with("/capture.jpg"));
}

#[test]
fn placeholder_sized_body_is_rejected() {
    let fixture = Fixture::serve(|_| (200, vec![0xff; 100]));
    let err = source().fetch_frame(&fixture.base_url).unwrap_err();
    assert!(matches!(
        err,
        FetchError::FrameTooSmall { len: 100, min: 1024, .. }
    ));
}
