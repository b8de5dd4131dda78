use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use theialookup::{ManualClock, MovieDbApi, MovieDbClient, RateLimiter, TvDbApi, TvDbClient};

const WINDOW: Duration = Duration::from_millis(500);

/// Answers both providers' endpoints and records when each request arrived
struct StubServer {
    port: u16,
    arrivals: Arc<Mutex<Vec<(String, Duration)>>>,
    max_in_flight: Arc<AtomicUsize>,
}

impl StubServer {
    fn start(clock: ManualClock) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let (log, max) = (arrivals.clone(), max_in_flight.clone());
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let (clock, log, max, in_flight) =
                    (clock.clone(), log.clone(), max.clone(), in_flight.clone());
                thread::spawn(move || serve(stream, clock, log, max, in_flight));
            }
        });

        Self {
            port,
            arrivals,
            max_in_flight,
        }
    }

    fn url(&self, prefix: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, prefix)
    }
}

fn serve(
    stream: TcpStream,
    clock: ManualClock,
    log: Arc<Mutex<Vec<(String, Duration)>>>,
    max: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    let mut content_length = 0;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        if header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).unwrap();

    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    max.fetch_max(now, Ordering::SeqCst);
    let path = request_line.split_whitespace().nth(1).unwrap().to_string();
    log.lock().unwrap().push((path.clone(), clock.elapsed()));

    // leave room for a concurrent request to show up
    thread::sleep(Duration::from_millis(30));

    let payload = if path.contains("/login") {
        r#"{"token":"t0k"}"#
    } else if path.contains("/search/series") {
        r#"{"data":[{"id":73244,"seriesName":"The Office"}]}"#
    } else if path.contains("/tv/series/") {
        r#"{"data":{"id":73244,"seriesName":"The Office"}}"#
    } else if path.contains("/search/movie") {
        r#"{"results":[{"id":949,"title":"Heat"}]}"#
    } else {
        r#"{"id":949,"title":"Heat"}"#
    };
    // headers and half the body, then a pause: the body is still streaming
    let (head, tail) = payload.split_at(payload.len() / 2);
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        head
    )
    .unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(30));

    in_flight.fetch_sub(1, Ordering::SeqCst);
    stream.write_all(tail.as_bytes()).unwrap();
}

#[test]
fn test_both_providers_share_one_window() {
    let clock = ManualClock::new();
    let server = StubServer::start(clock.clone());
    let limiter = Arc::new(RateLimiter::with_clock(WINDOW, clock.clone()));

    let tv = TvDbClient::new(
        limiter.clone(),
        &server.url("/tv"),
        "key",
        "en",
        Duration::from_secs(5),
    );
    let movie = MovieDbClient::new(limiter, &server.url("/movie"), "key", Duration::from_secs(5));

    let tv_worker = thread::spawn(move || {
        let hits = tv.search_series("the office").unwrap();
        tv.series(hits[0].series_id).unwrap()
    });
    let movie_worker = thread::spawn(move || {
        let hits = movie.search_movie("heat", "1995").unwrap();
        movie.movie(hits[0].movie_id).unwrap()
    });
    assert_eq!(tv_worker.join().unwrap().series_id, 73244);
    assert_eq!(movie_worker.join().unwrap().movie_id, 949);

    let arrivals = server.arrivals.lock().unwrap().clone();
    // login, search and detail on TVDB; search and detail on TMDb
    assert_eq!(arrivals.len(), 5);
    assert!(arrivals.iter().any(|(path, _)| path.starts_with("/movie/")));
    assert!(arrivals.iter().any(|(path, _)| path.starts_with("/tv/")));
    for pair in arrivals.windows(2) {
        assert!(
            pair[1].1 - pair[0].1 >= WINDOW,
            "{} then {} too close",
            pair[0].0,
            pair[1].0
        );
    }
    assert!(clock.elapsed() >= WINDOW * 4);
    assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 1);
}
