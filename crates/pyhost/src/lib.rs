//! Python project hosting engine.
//!
//! Projects live in a SQLite store as a tree of text files. The supervisor
//! materializes a tree into a workspace directory, runs its entry file under
//! the interpreter and streams output to WebSocket subscribers, while a
//! filesystem watcher mirrors what the program writes back into the store.

pub mod api;
pub mod archive;
pub mod config;
pub mod db;
pub mod hub;
pub mod process;
pub mod runner;
pub mod store;
pub mod supervisor;
pub mod watcher;
pub mod workspace;
