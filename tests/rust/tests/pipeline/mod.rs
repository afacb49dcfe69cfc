//! Event pipeline integration tests
//!
//! Hub events flowing through rule matching, the bounded queue and the
//! processor to a notification sink.
