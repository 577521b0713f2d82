//! Integration tests: full evaluation passes against the in-memory mock
//! store and the real SQLite store.

mod evaluation;
