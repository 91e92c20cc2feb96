//! Releases a pretend connection when the future that uses it is closed.
//!
//! Shows callback ordering, failure aggregation and late registration.

use std::io;
use std::thread;

use closeable_future::{CloseableFuture, CloseableStage, Suppress};

fn main() {
    let response = CloseableFuture::<String, io::ErrorKind>::new();

    response.when_closed(|| println!("3. returning connection to pool"));
    response
        .try_when_closed(|| Err(io::Error::other("2. could not flush request log")))
        .expect("the future is not closed yet, so the callback is only registered");
    response.when_closed(|| println!("1. releasing response buffer"));

    let producer = response.completion().clone();
    let worker = thread::spawn(move || {
        producer.complete("HTTP/1.1 200 OK".to_owned());
    });

    println!("Received: {:?}", response.get());
    worker.join().expect("worker thread panicked");

    match response.close() {
        Ok(()) => println!("Closed cleanly"),
        Err(error) => println!("Closed with failures: {error}"),
    }

    println!("Closing again does nothing: {:?}", response.close());

    response.when_closed(|| println!("Late callback runs immediately"));

    // Resources that are not closable by themselves can be given a close handler.
    let socket = CloseableStage::with_close_handler("127.0.0.1:8080", || {
        println!("Shutting down socket");
        Ok::<(), io::Error>(())
    });

    let mut suppress = Suppress::new();
    suppress.close(&socket);
    suppress.close(&response);

    println!("Socket closed: {}", socket.is_closed());
    println!("Combined result: {:?}", suppress.finish().map_err(|e| e.to_string()));
}
