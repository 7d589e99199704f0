//! Integration-style test suites.
//!
//! The harness provides a mock Livestatus endpoint speaking fixed16 over
//! Unix sockets and TCP. Builder and parser unit tests live next to their
//! modules; everything here exercises whole flows.


mod transport;
