// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-device session engine.
//!
//! One session owns the kernel-facing socket of a socket pair. A single
//! ingress task decodes requests and fans them out to the shared worker
//! pool; workers answer on the same socket under the writer lock, so every
//! reply frame (header plus optional READ payload) hits the wire as one
//! indivisible unit. Replies may complete in any order — the kernel
//! correlates them by the echoed 8-byte handle.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zerocopy::IntoBytes;

use crate::{
    device::BlockDevice,
    models::{Command, REQUEST_LEN, ReplyHeader, RequestHeader, Status},
    pool::{Task, WorkerPool},
    session::inflight::Inflight,
};

/// One in-flight operation, owned by whichever task is currently driving
/// it: built on ingress, consumed by the worker that writes its reply.
#[derive(Debug)]
struct Request {
    id: u64,
    handle: [u8; 8],
    /// Raw command tag; decoded at dispatch so unknown tags still produce
    /// an addressed error reply.
    cmd: u32,
    offset: u64,
    len: u32,
    /// WRITE payload, read off the socket on ingress.
    payload: Option<Bytes>,
}

/// Per-device session state. Shared between the ingress task and every
/// worker servicing one of its requests.
#[derive(Debug)]
pub struct Session<D> {
    /// Ingress half. The lock serializes request parsing; header and
    /// payload of one request are read under a single acquisition.
    reader: Mutex<OwnedReadHalf>,
    /// Egress half. Held across an entire reply frame; never across an
    /// inflight-registry mutation.
    writer: Mutex<OwnedWriteHalf>,
    device: Arc<D>,
    pool: WorkerPool,
    inflight: Inflight,
    /// Requests the pool bounced back and the ingress task ran itself.
    inline_runs: AtomicUsize,
    /// Session-alive flag; cancelling twice is harmless.
    cancel: CancellationToken,
    drain_poll: Duration,
}

impl<D: BlockDevice> Session<D> {
    pub fn new(
        stream: UnixStream,
        device: Arc<D>,
        pool: WorkerPool,
        drain_poll: Duration,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        Arc::new(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            device,
            pool,
            inflight: Inflight::new(),
            inline_runs: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            drain_poll,
        })
    }

    /// Token observing (and forcing) session shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of accepted requests not yet answered.
    pub fn num_running(&self) -> usize {
        self.inflight.len()
    }

    /// Number of requests executed inline on the ingress task because the
    /// pool queue was full.
    pub fn inline_runs(&self) -> usize {
        self.inline_runs.load(Ordering::SeqCst)
    }

    /// Run the session to completion: ingress loop, then drain.
    ///
    /// Returns once every accepted request has emitted its reply and the
    /// registry is empty. Protocol failures are logged and terminate the
    /// loop; they are not surfaced to the caller, matching the one-shot
    /// lifecycle of a kernel-driven session.
    pub async fn serve(self: Arc<Self>) {
        Self::ingress_loop(&self).await;
        self.inflight.drain(self.drain_poll).await;
    }

    async fn ingress_loop(session: &Arc<Self>) {
        loop {
            let next = tokio::select! {
                _ = session.cancel.cancelled() => break,
                res = session.next_request() => res,
            };

            let (header, payload) = match next {
                Ok(Some(req)) => req,
                Ok(None) => {
                    debug!("kernel socket closed");
                    session.cancel.cancel();
                    break;
                },
                Err(e) => {
                    error!("failed to read request: {e}");
                    session.cancel.cancel();
                    break;
                },
            };

            if header.cmd.get() == Command::Disc as u32 {
                info!("received disconnect");
                session.device.disconnect().await;
                session.cancel.cancel();
                break;
            }

            let record = Request {
                id: session.inflight.insert(header.cmd.get()),
                handle: header.handle,
                cmd: header.cmd.get(),
                offset: header.offset.get(),
                len: header.len.get(),
                payload,
            };

            let task: Task = Box::pin(Arc::clone(session).process(record));
            if let Err(task) = session.pool.try_submit(task) {
                debug!("worker pool full, executing inline");
                session.inline_runs.fetch_add(1, Ordering::SeqCst);
                task.await;
            }
        }
    }

    /// Read one request — header, then the WRITE payload if the command
    /// carries one — under a single reader acquisition.
    ///
    /// `Ok(None)` is a clean close; any short read past the first header
    /// byte is a framing error.
    async fn next_request(&self) -> Result<Option<(RequestHeader, Option<Bytes>)>> {
        let mut r = self.reader.lock().await;

        let mut header_buf = [0u8; REQUEST_LEN];
        match r.read_exact(&mut header_buf).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        }

        let header = RequestHeader::from_bytes(&header_buf)?.clone();
        debug!("RECV {header:?}");

        // Commands other than WRITE carry nothing after the header, so an
        // unknown tag consumes no payload bytes either.
        let payload = if header.cmd.get() == Command::Write as u32 {
            let mut buf = BytesMut::zeroed(header.len.get() as usize);
            r.read_exact(&mut buf).await?;
            Some(buf.freeze())
        } else {
            None
        };

        Ok(Some((header, payload)))
    }

    /// Worker body: invoke the handler and emit the reply. Runs either on a
    /// pool executor or inline on the ingress task when the pool is full.
    async fn process(self: Arc<Self>, req: Request) {
        let mut reply = ReplyHeader::new(req.handle);
        let mut payload: Option<Bytes> = None;

        match Command::from_u32(req.cmd) {
            Some(Command::Read) => {
                let mut buf = BytesMut::zeroed(req.len as usize);
                let status = self.device.read(&mut buf, req.offset).await;
                reply.set_error(status.raw());
                if status.is_ok() {
                    payload = Some(buf.freeze());
                }
            },
            Some(Command::Write) => {
                let buf = req.payload.as_deref().unwrap_or(&[]);
                let status = self.device.write(buf, req.offset).await;
                reply.set_error(status.raw());
            },
            Some(Command::Flush) => {
                reply.set_error(self.device.flush().await.raw());
            },
            Some(Command::Trim) => {
                reply.set_error(self.device.trim(req.offset, req.len).await.raw());
            },
            // Intercepted on ingress; a record never reaches the pool.
            Some(Command::Disc) => {},
            None => {
                warn!(cmd = req.cmd, "unknown command");
                reply.set_error(Status::EINVAL.raw());
            },
        }

        self.send_reply(&reply, payload.as_deref()).await;
        self.inflight.remove(req.id);
    }

    /// Write `[header, payload?]` as one critical section. READ payloads
    /// and later replies share this socket; interleaving would corrupt the
    /// kernel's framing.
    async fn send_reply(&self, reply: &ReplyHeader, payload: Option<&[u8]>) {
        let mut w = self.writer.lock().await;

        let res = async {
            w.write_all(reply.as_bytes()).await?;
            if let Some(p) = payload {
                w.write_all(p).await?;
            }
            std::io::Result::Ok(())
        }
        .await;

        if let Err(e) = res {
            error!("failed to write reply: {e}");
            self.cancel.cancel();
        }
    }
}
