use std::io::Write;

use crate::error::Result;
use crate::opts::Opts;
use crate::protocol::frontend::write_cancel_request;

use super::stream::Stream;

/// Key for cancelling the running query of one backend.
///
/// Cancellation goes over a separate connection; the backend closes it
/// without replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken {
    process_id: u32,
    secret: u32,
}

impl CancelToken {
    pub fn new(process_id: u32, secret: u32) -> Self {
        Self { process_id, secret }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn secret(&self) -> u32 {
        self.secret
    }

    /// Append the CancelRequest packet to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_cancel_request(buf, self.process_id, self.secret);
    }

    /// Send the CancelRequest over an already open stream.
    pub fn send<W: Write>(&self, mut stream: W) -> Result<()> {
        let mut buf = Vec::with_capacity(16);
        self.encode(&mut buf);
        stream.write_all(&buf)?;
        stream.flush()?;
        tracing::debug!(process_id = self.process_id, "sent cancel request");
        Ok(())
    }

    /// Open a new connection to the server in `opts` and send the request.
    pub fn cancel(&self, opts: &Opts) -> Result<()> {
        self.send(Stream::connect(opts)?)
    }
}
