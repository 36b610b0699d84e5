//! Connection state machine for the single SPP session.
//!
//! At most one session exists. A connect request moves it to
//! `Connecting`, the radio's answer moves it to `Connected` or back to
//! `Idle`, and every way out of `Connected` releases the link first.
//! A failed attempt is not a separate state: it collapses to `Idle` and
//! leaves its cause in the status message.

use std::time::Duration;

use bluer::Address;
use log::{debug, info, warn};
use smol_str::{SmolStr, format_smolstr};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
   bluetooth::transport::{Link, Received},
   error::Result,
};

pub const STATUS_IDLE: &str = "Not connected";
pub const STATUS_CONNECTING: &str = "Connecting...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
   Idle,
   Connecting,
   Connected,
}

/// What a connect completion did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
   Connected,
   Failed,
   /// A newer attempt or a disconnect got there first; the stream, if
   /// any, was closed.
   Stale,
}

#[derive(Debug)]
pub struct Session<S> {
   state: SessionState,
   target: Option<Address>,
   status: SmolStr,
   link: Option<Link<S>>,
   attempt: u64,
   send_timeout: Duration,
   receive_timeout: Duration,
}

impl<S> Session<S>
where
   S: AsyncRead + AsyncWrite + Send + Unpin,
{
   pub fn new(send_timeout: Duration, receive_timeout: Duration) -> Self {
      Self {
         state: SessionState::Idle,
         target: None,
         status: SmolStr::new_static(STATUS_IDLE),
         link: None,
         attempt: 0,
         send_timeout,
         receive_timeout,
      }
   }

   pub const fn state(&self) -> SessionState {
      self.state
   }

   pub const fn target(&self) -> Option<Address> {
      self.target
   }

   pub fn status(&self) -> &SmolStr {
      &self.status
   }

   #[cfg(test)]
   pub fn has_open_link(&self) -> bool {
      self.link.as_ref().is_some_and(Link::is_open)
   }

   /// Enters `Connecting` for `address` and returns the attempt id the
   /// completion must carry. Any previous link is closed first.
   pub async fn begin_connect(&mut self, address: Address) -> u64 {
      self.release().await;
      self.attempt = self.attempt.wrapping_add(1);
      self.state = SessionState::Connecting;
      self.target = Some(address);
      self.status = SmolStr::new_static(STATUS_CONNECTING);
      debug!("Connect attempt #{} to {address}", self.attempt);
      self.attempt
   }

   /// Applies the radio's answer to attempt `attempt`.
   ///
   /// `name` is the resolved device name used in the status message.
   pub async fn complete_connect(
      &mut self,
      attempt: u64,
      address: Address,
      result: Result<S>,
      name: &str,
   ) -> Completion {
      if attempt != self.attempt || self.state != SessionState::Connecting {
         if let Ok(stream) = result {
            debug!("Closing stream of superseded attempt #{attempt} to {address}");
            Link::new(address, stream).close().await;
         }
         return Completion::Stale;
      }

      match result {
         Ok(stream) => {
            self.link = Some(Link::new(address, stream));
            self.state = SessionState::Connected;
            self.status = format_smolstr!("Connected - {name}");
            info!("Connected to {name} ({address})");
            Completion::Connected
         },
         Err(e) => {
            warn!("Connection to {address} failed: {e}");
            self.release().await;
            self.state = SessionState::Idle;
            self.target = None;
            self.status = format_smolstr!("Connection failed: {e}");
            Completion::Failed
         },
      }
   }

   /// Releases the link and returns to `Idle`. Close errors are swallowed.
   /// An attempt still in flight becomes stale.
   pub async fn disconnect(&mut self) {
      self.release().await;
      self.state = SessionState::Idle;
      self.target = None;
      self.status = SmolStr::new_static(STATUS_IDLE);
   }

   /// Returns `false` when not connected or when the write fails or
   /// times out.
   pub async fn send(&mut self, data: &[u8]) -> bool {
      let timeout = self.send_timeout;
      let Some(link) = self.connected_link() else {
         return false;
      };
      match link.send(data, timeout).await {
         Ok(()) => true,
         Err(e) => {
            warn!("Send failed: {e}");
            self.status = format_smolstr!("Send failed: {e}");
            false
         },
      }
   }

   /// One read of at most one buffer; `None` when not connected, when
   /// nothing arrived in time, or when the read fails.
   pub async fn receive(&mut self) -> Option<String> {
      let timeout = self.receive_timeout;
      let link = self.connected_link()?;
      match link.receive(timeout).await {
         Ok(Received::Data(text)) => Some(text),
         Ok(Received::Idle) => None,
         Err(e) => {
            warn!("Receive failed: {e}");
            self.status = format_smolstr!("Receive failed: {e}");
            None
         },
      }
   }

   fn connected_link(&mut self) -> Option<&mut Link<S>> {
      if self.state != SessionState::Connected {
         return None;
      }
      self.link.as_mut()
   }

   async fn release(&mut self) {
      if let Some(mut link) = self.link.take() {
         debug!("Releasing link to {}", link.address());
         link.close().await;
      }
   }
}

#[cfg(test)]
mod tests {
   use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

   use super::*;
   use crate::error::SppError;

   const TIMEOUT: Duration = Duration::from_millis(100);

   fn addr(last: u8) -> Address {
      Address::new([0x98, 0xd3, 0x31, 0x00, 0x00, last])
   }

   async fn assert_released(peer: &mut DuplexStream) {
      let mut buf = [0u8; 8];
      assert_eq!(peer.read(&mut buf).await.unwrap(), 0, "stream still held");
   }

   async fn connected(session: &mut Session<DuplexStream>, last: u8) -> DuplexStream {
      let (ours, peer) = duplex(1024);
      let id = session.begin_connect(addr(last)).await;
      assert_eq!(
         session.complete_connect(id, addr(last), Ok(ours), "HC-05").await,
         Completion::Connected
      );
      peer
   }

   #[tokio::test]
   async fn test_happy_path() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      assert_eq!(session.state(), SessionState::Idle);
      assert_eq!(session.status(), STATUS_IDLE);

      let id = session.begin_connect(addr(1)).await;
      assert_eq!(session.state(), SessionState::Connecting);
      assert_eq!(session.status(), STATUS_CONNECTING);

      let (ours, mut peer) = duplex(1024);
      session.complete_connect(id, addr(1), Ok(ours), "HC-05").await;
      assert_eq!(session.state(), SessionState::Connected);
      assert_eq!(session.status(), "Connected - HC-05");
      assert_eq!(session.target(), Some(addr(1)));

      assert!(session.send(b"LED_ON").await);
      let mut buf = [0u8; 16];
      let n = peer.read(&mut buf).await.unwrap();
      assert_eq!(&buf[..n], b"LED_ON");

      peer.write_all(b"OK").await.unwrap();
      assert_eq!(session.receive().await.as_deref(), Some("OK"));
      assert_eq!(session.receive().await, None);

      session.disconnect().await;
      assert_eq!(session.state(), SessionState::Idle);
      assert_eq!(session.status(), STATUS_IDLE);
      assert_released(&mut peer).await;
   }

   #[tokio::test]
   async fn test_send_receive_outside_connected() {
      let mut session = Session::<DuplexStream>::new(TIMEOUT, TIMEOUT);
      assert!(!session.send(b"AT").await);
      assert_eq!(session.receive().await, None);

      session.begin_connect(addr(1)).await;
      assert!(!session.send(b"AT").await);
      assert_eq!(session.receive().await, None);
      assert_eq!(session.state(), SessionState::Connecting);
      assert_eq!(session.status(), STATUS_CONNECTING);
   }

   #[tokio::test]
   async fn test_failed_connect_collapses_to_idle() {
      let mut session = Session::<DuplexStream>::new(TIMEOUT, TIMEOUT);
      let id = session.begin_connect(addr(1)).await;
      let completion = session
         .complete_connect(id, addr(1), Err(SppError::RequestTimeout), "HC-05")
         .await;

      assert_eq!(completion, Completion::Failed);
      assert_eq!(session.state(), SessionState::Idle);
      assert_eq!(session.target(), None);
      assert!(!session.has_open_link());
      assert_eq!(session.status(), "Connection failed: Request timeout");
   }

   #[tokio::test]
   async fn test_reconnect_releases_previous_link_first() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      let mut first = connected(&mut session, 1).await;

      let id = session.begin_connect(addr(2)).await;
      // Released before the new attempt has any stream.
      assert!(!session.has_open_link());
      assert_released(&mut first).await;

      let (ours, _second) = duplex(1024);
      session.complete_connect(id, addr(2), Ok(ours), "HC-06").await;
      assert_eq!(session.target(), Some(addr(2)));
      assert!(session.has_open_link());
   }

   #[tokio::test]
   async fn test_stale_completion_is_closed() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      let old = session.begin_connect(addr(1)).await;
      let new = session.begin_connect(addr(2)).await;
      assert_ne!(old, new);

      let (ours, mut peer) = duplex(1024);
      assert_eq!(
         session.complete_connect(old, addr(1), Ok(ours), "old").await,
         Completion::Stale
      );
      assert_released(&mut peer).await;
      assert_eq!(session.state(), SessionState::Connecting);
      assert_eq!(session.target(), Some(addr(2)));
   }

   #[tokio::test]
   async fn test_completion_after_disconnect_is_stale() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      let id = session.begin_connect(addr(1)).await;
      session.disconnect().await;

      let (ours, mut peer) = duplex(1024);
      assert_eq!(
         session.complete_connect(id, addr(1), Ok(ours), "x").await,
         Completion::Stale
      );
      assert_eq!(session.state(), SessionState::Idle);
      assert_released(&mut peer).await;
   }

   #[tokio::test]
   async fn test_disconnect_reconnect_disconnect() {
      for reconnect_succeeds in [true, false] {
         let mut session = Session::new(TIMEOUT, TIMEOUT);
         let mut first = connected(&mut session, 1).await;
         session.disconnect().await;
         assert_released(&mut first).await;

         let id = session.begin_connect(addr(1)).await;
         let second = if reconnect_succeeds {
            let (ours, peer) = duplex(1024);
            session.complete_connect(id, addr(1), Ok(ours), "HC-05").await;
            Some(peer)
         } else {
            session
               .complete_connect(id, addr(1), Err(SppError::ConnectionClosed), "HC-05")
               .await;
            None
         };

         session.disconnect().await;
         assert_eq!(session.state(), SessionState::Idle);
         assert!(!session.has_open_link());
         if let Some(mut peer) = second {
            assert_released(&mut peer).await;
         }
      }
   }

   #[tokio::test]
   async fn test_stalled_send_reports_failure() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      let _peer = connected(&mut session, 1).await;

      assert!(!session.send(&[b'x'; 4096]).await);
      assert_eq!(session.state(), SessionState::Connected);
      assert_eq!(session.status(), "Send failed: Request timeout");
   }

   #[tokio::test]
   async fn test_peer_hangup_reports_receive_failure() {
      let mut session = Session::new(TIMEOUT, TIMEOUT);
      let peer = connected(&mut session, 1).await;
      drop(peer);

      assert_eq!(session.receive().await, None);
      assert_eq!(session.status(), "Receive failed: Connection closed by peer");
   }
}
