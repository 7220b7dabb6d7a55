//! JSON-RPC 2.0 plumbing for the app-server connection.
//!
//! Three layers, leaf first:
//! - [`transport`]: newline-delimited JSON framing over any duplex byte
//!   stream. The writer half serializes whole messages under a lock so
//!   concurrent sends never interleave; the reader half yields one raw line
//!   at a time.
//! - [`envelope`]: classification of inbound messages into server requests,
//!   responses, and notifications, plus the outbound envelope builders and
//!   the wire error codes.
//! - [`router`]: request/response correlation against a pending-request
//!   table, notification fan-out to registered listeners, and dispatch of
//!   inbound server requests to the configured approval handlers. A single
//!   reader task owns the receive side; everything it hands to user code is
//!   snapshotted out of the tables first, and panics in user callbacks are
//!   caught at the dispatch boundary so the loop never unwinds.

pub(crate) mod envelope;
pub(crate) mod router;
pub(crate) mod transport;
