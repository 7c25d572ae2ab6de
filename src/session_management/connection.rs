use super::auth_bridge::CaptureHandler;
use super::session::SessionShared;
use crate::error_handling::types::SessionError;
use log::debug;
use russh::server::{Config, Handle, RunningSession};
use russh::Disconnect;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// What the state machine needs from a live protocol connection.
pub trait Connection: Send {
    /// Resolves once the engine is done with the connection, with the error
    /// that ended it if any. Cancel-safe; resolves immediately once it has
    /// resolved before.
    fn closed(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Sends end-of-file and close on every channel the client opened.
    fn shutdown_channels(&mut self) -> impl Future<Output = ()> + Send;

    /// Asks the engine to disconnect the client.
    fn request_close(&mut self) -> impl Future<Output = ()> + Send;

    /// Makes every further transport read and write fail, ending the
    /// engine's task without the peer's cooperation.
    fn abort(&mut self);
}

/// A connection served by the russh engine.
pub struct RusshConnection {
    running: Option<RunningSession<CaptureHandler>>,
    handle: Handle,
    shared: Arc<SessionShared>,
    sever: CancellationToken,
}

impl RusshConnection {
    /// Exchanges identification strings and hands the stream to the engine,
    /// which continues with key exchange on its own task.
    pub async fn start<S>(
        config: Arc<Config>,
        stream: S,
        handler: CaptureHandler,
        shared: Arc<SessionShared>,
    ) -> Result<Self, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let sever = CancellationToken::new();
        let stream = SeverableStream::new(stream, sever.clone());
        let running = russh::server::run_stream(config, stream, handler).await?;

        Ok(Self {
            handle: running.handle(),
            running: Some(running),
            shared,
            sever,
        })
    }
}

impl Connection for RusshConnection {
    async fn closed(&mut self) -> Result<(), SessionError> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        let result = running.await;
        self.running = None;
        result
    }

    async fn shutdown_channels(&mut self) {
        for id in self.shared.take_channels() {
            debug!("Closing channel {:?}", id);
            let _ = self.handle.eof(id).await;
            let _ = self.handle.close(id).await;
        }
    }

    async fn request_close(&mut self) {
        if self.running.is_none() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(
                Disconnect::ByApplication,
                "Too many authentication failures".into(),
                "en".into(),
            )
            .await
        {
            debug!("Disconnect request not delivered: {}", e);
        }
    }

    fn abort(&mut self) {
        self.sever.cancel();
    }
}

impl Drop for RusshConnection {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.sever.cancel();
        }
    }
}

/// Transport wrapper that fails all I/O once its token is cancelled.
struct SeverableStream<S> {
    inner: S,
    token: CancellationToken,
    severed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> SeverableStream<S> {
    fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            severed: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    /// Ready with an error once severed. Otherwise registers the waker so a
    /// pending operation is woken by the cancellation.
    fn poll_severed(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        if self.token.is_cancelled() || self.severed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session aborted",
            ));
        }
        Poll::Pending
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SeverableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(e) = this.poll_severed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SeverableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(e) = this.poll_severed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(e) = this.poll_severed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(e) = this.poll_severed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
