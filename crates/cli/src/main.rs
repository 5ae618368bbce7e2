//! # cli - Riptide interactive shell
//!
//! A REPL-style command-line client for the `mount` core pool. Reads
//! commands from stdin, encodes each one as a query packet (spec.md §6),
//! sends it through `Mount::query_sync`, and prints the result. Designed
//! for both interactive use and scripted testing (pipe commands via
//! stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value   Write key's value (field B)
//! GET key         Read key's value (prints it, or "(nil)")
//! INCR key delta  Run the increment write-procedure on field A
//! DEL key         Tombstone key
//! RESET key       Restore key to its schema default
//! STATS           Print the running core pool's configuration
//! EXIT / QUIT     Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! Loaded via [`config::Config::from_env`] — see that crate for the full
//! `RIPTIDE_*` environment variable surface (root directory, core count,
//! NUMA, WAL/segment tuning). `RIPTIDE_CONFIG_PATH`, if set, loads a TOML
//! file first and applies the environment overrides on top of it.
//!
//! The demo schema (`schema::demo::NoSortSchema`, id 1) is registered at
//! startup so the commands above have something to operate against without
//! requiring a schema id on every line.
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use config::Config;
use mount::Mount;
use schema::demo::{encode_pkey, NoSortSchema};
use schema::registry;

const DEMO_SCHEMA_ID: u32 = 1;
const FIELD_A: u8 = 0;
const FIELD_B: u8 = 1;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = match std::env::var("RIPTIDE_CONFIG_PATH") {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::from_env(),
    };

    registry::register(Arc::new(NoSortSchema::new(DEMO_SCHEMA_ID)));
    let mount = Mount::open(&cfg)?;

    println!("Riptide started (root={}, cores={})", cfg.root.display(), cfg.mnt.cores);
    println!("Commands: SET key value | GET key | INCR key delta | DEL key | RESET key | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match mount.query_sync(&write_field_packet(k.as_bytes(), FIELD_B, v.as_bytes())) {
                                Ok(_) => println!("OK"),
                                Err(e) => println!("ERR set failed: {e}"),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match mount.query_sync(&read_field_packet(k.as_bytes(), FIELD_B)) {
                            Ok(results) => match results.first().and_then(|r| r.value.as_ref()) {
                                Some(bytes) => println!("{}", String::from_utf8_lossy(bytes)),
                                None => println!("(nil)"),
                            },
                            Err(e) => println!("ERR get failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "INCR" => {
                    if let (Some(k), Some(delta)) = (parts.next(), parts.next()) {
                        match delta.parse::<i64>() {
                            Ok(delta) => match mount.query_sync(&wproc_packet(k.as_bytes(), FIELD_A, delta)) {
                                Ok(_) => println!("OK"),
                                Err(e) => println!("ERR incr failed: {e}"),
                            },
                            Err(_) => println!("ERR usage: INCR key delta"),
                        }
                    } else {
                        println!("ERR usage: INCR key delta");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match mount.query_sync(&remove_packet(k.as_bytes())) {
                            Ok(_) => println!("OK"),
                            Err(e) => println!("ERR del failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "RESET" => {
                    if let Some(k) = parts.next() {
                        match mount.query_sync(&reset_packet(k.as_bytes())) {
                            Ok(_) => println!("OK"),
                            Err(e) => println!("ERR reset failed: {e}"),
                        }
                    } else {
                        println!("ERR usage: RESET key");
                    }
                }
                "STATS" => {
                    println!("root={} cores={} numa={}", cfg.root.display(), cfg.mnt.cores, cfg.mnt.numa);
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {other}");
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    mount.shutdown()
}

fn partition_hash_of(key: &[u8]) -> u64 {
    engine::partition_hash(&encode_pkey(key))
}

fn fetch_header(key: &[u8]) -> Vec<u8> {
    let mut b = vec![0u8, b'f'];
    b.extend_from_slice(&partition_hash_of(key).to_le_bytes());
    b.extend_from_slice(&DEMO_SCHEMA_ID.to_le_bytes());
    b
}

fn write_field_packet(key: &[u8], field_id: u8, value: &[u8]) -> Vec<u8> {
    let mut b = fetch_header(key);
    b.push(b'w');
    b.push(field_id);
    b.extend_from_slice(&(value.len() as u32).to_le_bytes());
    b.extend_from_slice(value);
    b
}

fn read_field_packet(key: &[u8], field_id: u8) -> Vec<u8> {
    let mut b = fetch_header(key);
    b.push(b'r');
    b.push(field_id);
    b
}

fn wproc_packet(key: &[u8], field_id: u8, delta: i64) -> Vec<u8> {
    let mut b = fetch_header(key);
    b.push(b'+');
    b.push(field_id);
    b.push(0); // opcode 0: increment
    let args = delta.to_le_bytes();
    b.extend_from_slice(&(args.len() as u32).to_le_bytes());
    b.extend_from_slice(&args);
    b
}

fn remove_packet(key: &[u8]) -> Vec<u8> {
    let mut b = fetch_header(key);
    b.push(b'P');
    b
}

fn reset_packet(key: &[u8]) -> Vec<u8> {
    let mut b = fetch_header(key);
    b.push(b'R');
    b
}
