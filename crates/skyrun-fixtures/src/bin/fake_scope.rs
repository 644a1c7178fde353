//! Fixture: a fake telescope listening on localhost.
//! Used for manual testing of the `skyrun` CLI without hardware.
//!
//! Usage: `skyrun-fake-scope [port] [goto-state ...]`
//!
//! With no states every goto reports `working` then `complete`.

// Test fixtures require special allowances - they are not production code
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

use skyrun_fixtures::FakeScope;
use std::env;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let port: u16 = args.first().and_then(|s| s.parse().ok()).unwrap_or(4700);
    let states: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();

    let mut builder = FakeScope::builder()
        .bind(&format!("127.0.0.1:{port}"))
        .event_delay(Duration::from_millis(500));
    if !states.is_empty() {
        builder = builder.goto_events(&states);
    }
    let scope = builder.start();

    println!("fake scope listening on {}", scope.addr());
    io::stdout().flush().ok();

    let mut seen = 0;
    loop {
        thread::sleep(Duration::from_millis(200));
        let methods = scope.methods();
        for method in methods.iter().skip(seen) {
            println!("<- {method}");
        }
        seen = methods.len();
        io::stdout().flush().ok();
    }
}
