//! Byte-stream endpoints of a connected session.
//!
//! A [`Link`] owns both halves of the stream handed back by the radio and
//! moves raw, unframed bytes. Turning reads into messages is the caller's
//! business.

use std::time::Duration;

use bluer::Address;
use log::{debug, warn};
use tokio::{
   io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
   time,
};

use crate::error::{Result, SppError};

/// Size of the buffer a single receive reads into.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Outcome of a single read.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
   Data(String),
   /// Nothing arrived within the receive timeout.
   Idle,
}

/// Input and output halves of a connected stream.
#[derive(Debug)]
pub struct Link<S> {
   address: Address,
   input: Option<ReadHalf<S>>,
   output: Option<WriteHalf<S>>,
}

impl<S> Link<S>
where
   S: AsyncRead + AsyncWrite + Send + Unpin,
{
   pub fn new(address: Address, stream: S) -> Self {
      let (input, output) = io::split(stream);
      Self {
         address,
         input: Some(input),
         output: Some(output),
      }
   }

   pub const fn address(&self) -> Address {
      self.address
   }

   pub const fn is_open(&self) -> bool {
      self.input.is_some() && self.output.is_some()
   }

   /// Writes the whole buffer or fails. A peer that stops reading fails
   /// the send with [`SppError::RequestTimeout`] once `timeout` elapses.
   pub async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
      let output = self.output.as_mut().ok_or(SppError::NotConnected)?;
      debug!("→ {}: {}", self.address, hex::encode(data));
      let write = async {
         output.write_all(data).await?;
         output.flush().await
      };
      time::timeout(timeout, write)
         .await
         .map_err(|_| SppError::RequestTimeout)??;
      Ok(())
   }

   /// Reads once, up to [`RECEIVE_BUFFER_SIZE`] bytes.
   ///
   /// Bytes that are not valid UTF-8 are replaced. A timed out read
   /// consumes nothing from the stream.
   pub async fn receive(&mut self, timeout: Duration) -> Result<Received> {
      let input = self.input.as_mut().ok_or(SppError::NotConnected)?;
      let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
      let n = match time::timeout(timeout, input.read(&mut buf)).await {
         Ok(res) => res?,
         Err(_) => return Ok(Received::Idle),
      };
      if n == 0 {
         return Err(SppError::ConnectionClosed);
      }
      let recvd = &buf[..n];
      debug!("← {}: {}", self.address, hex::encode(recvd));
      Ok(Received::Data(String::from_utf8_lossy(recvd).into_owned()))
   }

   /// Releases both halves. Shutdown errors are logged and dropped.
   pub async fn close(&mut self) {
      if let Some(mut output) = self.output.take()
         && let Err(e) = output.shutdown().await
      {
         warn!("Error shutting down stream to {}: {e}", self.address);
      }
      self.input = None;
   }
}
