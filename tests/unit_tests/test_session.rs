// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use anyhow::Result;
use nbd_adapter_rs::{
    Status,
    models::{Command, NBD_REPLY_MAGIC, REPLY_LEN, ReplyHeader},
};
use tokio::{
    io::AsyncReadExt,
    time::timeout,
};

use crate::unit_tests::common::{
    TestDevice, handle_from, read_reply, send_request, small_pool, start_session,
};

const CMD_READ: u32 = Command::Read as u32;
const CMD_WRITE: u32 = Command::Write as u32;
const CMD_DISC: u32 = Command::Disc as u32;
const CMD_FLUSH: u32 = Command::Flush as u32;
const CMD_TRIM: u32 = Command::Trim as u32;

#[tokio::test]
async fn read_4096_at_offset_zero() -> Result<()> {
    let device = Arc::new(TestDevice::default());
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    let handle = handle_from(0x11);
    send_request(&mut kernel, CMD_READ, handle, 0, 4096, None).await?;

    let (reply, payload) = read_reply(&mut kernel, 4096).await?;
    assert_eq!(reply.magic.get(), NBD_REPLY_MAGIC);
    assert_eq!(reply.error.get(), 0);
    assert_eq!(reply.handle, handle);
    assert_eq!(payload.len(), 4096);
    assert!(payload.iter().all(|&b| b == 0));
    assert_eq!(device.reads.load(Ordering::SeqCst), 1);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn write_512_at_offset_1024() -> Result<()> {
    let device = Arc::new(TestDevice::default());
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    let handle = handle_from(0x22);
    let payload = vec![0xAB; 512];
    send_request(&mut kernel, CMD_WRITE, handle, 1024, 512, Some(&payload)).await?;

    // Write replies carry no payload; a follow-up flush parsing cleanly
    // proves nothing stray landed on the wire.
    let (reply, body) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.error.get(), 0);
    assert_eq!(reply.handle, handle);
    assert!(body.is_empty());

    send_request(&mut kernel, CMD_FLUSH, handle_from(0x23), 0, 0, None).await?;
    let (reply, _) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.handle, handle_from(0x23));

    let writes = device.writes.lock().expect("writes lock").clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, 1024);
    assert_eq!(writes[0].1, payload);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn flush_error_is_forwarded() -> Result<()> {
    let device = Arc::new(TestDevice {
        flush_status: Status::EIO,
        ..TestDevice::default()
    });
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    let handle = handle_from(0x33);
    send_request(&mut kernel, CMD_FLUSH, handle, 0, 0, None).await?;

    let (reply, body) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.error.get(), 5);
    assert_eq!(reply.handle, handle);
    assert!(body.is_empty());
    assert_eq!(device.flushes.load(Ordering::SeqCst), 1);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn trim_one_mebibyte() -> Result<()> {
    let device = Arc::new(TestDevice::default());
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    let handle = handle_from(0x44);
    send_request(&mut kernel, CMD_TRIM, handle, 0, 1024 * 1024, None).await?;

    let (reply, _) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.error.get(), 0);
    assert_eq!(reply.handle, handle);
    assert_eq!(
        device.trims.lock().expect("trims lock").clone(),
        vec![(0, 1024 * 1024)]
    );

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn failed_read_sends_header_only() -> Result<()> {
    let device = Arc::new(TestDevice {
        read_status: Status::EIO,
        ..TestDevice::default()
    });
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    send_request(&mut kernel, CMD_READ, handle_from(0x55), 0, 4096, None).await?;
    let (reply, body) = read_reply(&mut kernel, 4096).await?;
    assert_eq!(reply.error.get(), 5);
    assert!(body.is_empty());

    // The next frame must start right after the bare header.
    send_request(&mut kernel, CMD_FLUSH, handle_from(0x56), 0, 0, None).await?;
    let (reply, _) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.handle, handle_from(0x56));
    assert_eq!(reply.error.get(), 0);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn unknown_command_replies_einval_without_a_handler() -> Result<()> {
    let device = Arc::new(TestDevice::default());
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    let handle = handle_from(0x66);
    send_request(&mut kernel, 99, handle, 0, 0, None).await?;

    let (reply, body) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.error.get(), Status::EINVAL.raw());
    assert_eq!(reply.handle, handle);
    assert!(body.is_empty());
    assert_eq!(device.handled_ops(), 0);

    // Session keeps serving after the bad tag.
    send_request(&mut kernel, CMD_FLUSH, handle_from(0x67), 0, 0, None).await?;
    let (reply, _) = read_reply(&mut kernel, 0).await?;
    assert_eq!(reply.handle, handle_from(0x67));
    assert_eq!(reply.error.get(), 0);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;
    timeout(Duration::from_secs(5), serve).await??;
    Ok(())
}

#[tokio::test]
async fn disconnect_drains_outstanding_reads() -> Result<()> {
    let device = Arc::new(TestDevice {
        delay: Some(Duration::from_millis(5)),
        ..TestDevice::default()
    });
    let (mut kernel, session, serve) =
        start_session(Arc::clone(&device), small_pool(4, 16))?;

    for i in 0..10u64 {
        send_request(&mut kernel, CMD_READ, handle_from(i), i * 512, 512, None)
            .await?;
    }
    send_request(&mut kernel, CMD_DISC, handle_from(0xFF), 0, 0, None).await?;

    timeout(Duration::from_secs(10), serve).await??;

    // Every accepted read got exactly one reply; the registry is empty.
    let mut seen = HashSet::new();
    for _ in 0..10 {
        let (reply, payload) = read_reply(&mut kernel, 512).await?;
        assert_eq!(reply.error.get(), 0);
        assert_eq!(payload.len(), 512);
        assert!(seen.insert(reply.handle));
    }
    let expected: HashSet<[u8; 8]> = (0..10u64).map(handle_from).collect();
    assert_eq!(seen, expected);

    assert_eq!(device.discs.load(Ordering::SeqCst), 1);
    assert_eq!(device.reads.load(Ordering::SeqCst), 10);
    assert_eq!(session.num_running(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_survives_a_saturated_pool() -> Result<()> {
    // 2 workers + 4 queue slots against 1024 slow requests: most of the
    // burst can only complete through the inline fallback on the ingress
    // task.
    let device = Arc::new(TestDevice {
        delay: Some(Duration::from_millis(1)),
        fill: 0x5A,
        ..TestDevice::default()
    });
    let (mut kernel, session, serve) =
        start_session(Arc::clone(&device), small_pool(2, 4))?;

    const BURST: u64 = 1024;
    for i in 0..BURST {
        send_request(&mut kernel, CMD_READ, handle_from(i), i * 8, 8, None).await?;
    }

    let mut seen = HashSet::new();
    for _ in 0..BURST {
        let (reply, payload) =
            timeout(Duration::from_secs(30), read_reply(&mut kernel, 8)).await??;
        assert_eq!(reply.error.get(), 0);
        assert_eq!(payload, vec![0x5A; 8]);
        assert!(seen.insert(reply.handle), "duplicate reply");
    }
    let expected: HashSet<[u8; 8]> = (0..BURST).map(handle_from).collect();
    assert_eq!(seen, expected);
    assert_eq!(device.reads.load(Ordering::SeqCst), BURST as usize);

    send_request(&mut kernel, CMD_DISC, handle_from(0xFFFF), 0, 0, None).await?;
    timeout(Duration::from_secs(10), serve).await??;
    assert_eq!(session.num_running(), 0);

    // The burst dwarfs the 2+4 pool slots, so some replies must have been
    // produced by the ingress task itself.
    assert!(
        session.inline_runs() > 0,
        "expected the full queue to force inline execution"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replies_never_interleave() -> Result<()> {
    let device = Arc::new(TestDevice {
        delay: Some(Duration::from_millis(1)),
        fill: 0xC3,
        ..TestDevice::default()
    });
    let (mut kernel, _session, serve) =
        start_session(Arc::clone(&device), small_pool(8, 64))?;

    // Varying payload sizes: any interleaved frame desynchronizes the
    // strict parse below (magic check on every header).
    let mut lens: HashMap<[u8; 8], u32> = HashMap::new();
    for i in 0..32u64 {
        let len = (i as u32 % 7 + 1) * 512;
        let handle = handle_from(i);
        lens.insert(handle, len);
        send_request(&mut kernel, CMD_READ, handle, 0, len, None).await?;
    }

    for _ in 0..32 {
        let mut hdr = [0u8; REPLY_LEN];
        timeout(Duration::from_secs(10), kernel.read_exact(&mut hdr)).await??;
        let reply = ReplyHeader::from_bytes(&hdr)?.clone();
        assert_eq!(reply.magic.get(), NBD_REPLY_MAGIC);
        assert_eq!(reply.error.get(), 0);

        let len = lens
            .remove(&reply.handle)
            .expect("unexpected or duplicate handle");
        let mut payload = vec![0u8; len as usize];
        timeout(Duration::from_secs(10), kernel.read_exact(&mut payload)).await??;
        assert!(payload.iter().all(|&b| b == 0xC3));
    }
    assert!(lens.is_empty());

    send_request(&mut kernel, CMD_DISC, handle_from(0xFFFF), 0, 0, None).await?;
    timeout(Duration::from_secs(10), serve).await??;
    Ok(())
}

#[tokio::test]
async fn kernel_socket_close_ends_the_session() -> Result<()> {
    let device = Arc::new(TestDevice::default());
    let (kernel, session, serve) = start_session(Arc::clone(&device), small_pool(2, 8))?;

    drop(kernel);
    timeout(Duration::from_secs(5), serve).await??;
    assert_eq!(session.num_running(), 0);
    assert_eq!(device.discs.load(Ordering::SeqCst), 0);
    Ok(())
}
